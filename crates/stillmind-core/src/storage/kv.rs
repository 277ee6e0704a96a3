//! Persisted key-value storage.
//!
//! Everything this core durably stores (the subscription record, the install
//! timestamp, the anonymous billing user id) goes through the [`KvStore`]
//! trait: fixed string keys, opaque string values, whole-value overwrite on
//! every write. Two backends are provided; the shell picks one at composition
//! time.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

use crate::error::StorageError;

/// Generic persisted key-value store.
///
/// Keys are short fixed identifiers (`[a-z0-9_]+`), chosen by this crate.
pub trait KvStore: Send + Sync {
    /// Read the value under `key`, `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key` if present. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

impl dyn KvStore {
    /// Read and deserialize the JSON record under `key`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serialize `value` as JSON and write it under `key`.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.put(key, &raw)
    }
}

/// File-per-key store beneath a base directory.
///
/// The key doubles as the file name, so a record can be inspected or removed
/// with ordinary file tools.
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Store rooted at an explicit directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `data_dir()/kv`.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created.
    pub fn open_default() -> Result<Self, StorageError> {
        let base = super::data_dir().map_err(|e| StorageError::OpenFailed {
            path: PathBuf::from("~/.config/stillmind"),
            source: e,
        })?;
        Ok(Self::new(base.join("kv")))
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.key_path(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| StorageError::OpenFailed {
                path: self.root.clone(),
                source: e,
            })?;
        }
        std::fs::write(self.key_path(key), value).map_err(|e| StorageError::WriteFailed {
            key: key.to_string(),
            source: e,
        })
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFailed {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}

/// Same contract over the OS keyring.
///
/// Intended for shells that want the paywall record in encrypted storage
/// rather than a plain file.
pub struct KeyringKvStore {
    service: String,
}

impl KeyringKvStore {
    pub fn new() -> Self {
        Self {
            service: super::secrets::SERVICE.to_string(),
        }
    }
}

impl Default for KeyringKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for KeyringKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entry = keyring::Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let entry = keyring::Entry::new(&self.service, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let entry = keyring::Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
