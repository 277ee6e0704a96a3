//! Thin wrapper around the OS keyring for secret storage.
//!
//! The only secret this core manages is the billing provider API key. It is
//! deliberately kept out of `config.toml`.

use crate::error::StorageError;

pub const SERVICE: &str = "stillmind";

/// Keyring account under which the billing API key is stored.
pub const BILLING_API_KEY: &str = "billing_api_key";

pub fn get(account: &str) -> Result<Option<String>, StorageError> {
    let entry = keyring::Entry::new(SERVICE, account)?;
    match entry.get_password() {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn set(account: &str, value: &str) -> Result<(), StorageError> {
    let entry = keyring::Entry::new(SERVICE, account)?;
    entry.set_password(value)?;
    Ok(())
}

pub fn delete(account: &str) -> Result<(), StorageError> {
    let entry = keyring::Entry::new(SERVICE, account)?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
