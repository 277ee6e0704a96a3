//! First-launch bookkeeping: the install date and the anonymous billing id.
//!
//! Both records follow the same discipline: written once, immutable after.
//! A stored value that fails validation is an error and is left untouched;
//! overwriting the install date would silently re-open the trial window.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::KvStore;

/// KV key holding the first-launch timestamp (RFC 3339).
pub const INSTALL_DATE_KEY: &str = "install_date";

/// KV key holding the anonymous billing user id.
pub const APP_USER_ID_KEY: &str = "app_user_id";

const APP_USER_ID_PREFIX: &str = "stillmind-";

/// Return the recorded install date, writing `now` first if none exists.
///
/// Idempotent and safe to call on every cold start: at most one write ever
/// happens for the key.
///
/// # Errors
/// Storage failures, and a stored record that does not parse as RFC 3339.
/// Callers deciding trial access map any error to "no install date".
pub fn ensure_install_date(
    kv: &dyn KvStore,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, StorageError> {
    if let Some(raw) = kv.get(INSTALL_DATE_KEY)? {
        let recorded =
            DateTime::parse_from_rfc3339(raw.trim()).map_err(|e| StorageError::InvalidRecord {
                key: INSTALL_DATE_KEY.to_string(),
                message: e.to_string(),
            })?;
        return Ok(recorded.with_timezone(&Utc));
    }

    kv.put(INSTALL_DATE_KEY, &now.to_rfc3339())?;
    Ok(now)
}

/// Return the anonymous id this device uses with the billing provider,
/// creating `stillmind-<uuid>` on first call.
///
/// # Errors
/// Storage failures, and a stored id without the expected prefix.
pub fn ensure_app_user_id(kv: &dyn KvStore) -> Result<String, StorageError> {
    if let Some(raw) = kv.get(APP_USER_ID_KEY)? {
        let id = raw.trim().to_string();
        if id.starts_with(APP_USER_ID_PREFIX) {
            return Ok(id);
        }
        return Err(StorageError::InvalidRecord {
            key: APP_USER_ID_KEY.to_string(),
            message: format!("missing '{APP_USER_ID_PREFIX}' prefix"),
        });
    }

    let id = format!("{}{}", APP_USER_ID_PREFIX, Uuid::new_v4());
    kv.put(APP_USER_ID_KEY, &id)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileKvStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// KvStore wrapper counting writes, to pin down the at-most-one-write
    /// guarantee.
    struct CountingKv {
        inner: FileKvStore,
        writes: AtomicUsize,
    }

    impl CountingKv {
        fn new(dir: &TempDir) -> Self {
            Self {
                inner: FileKvStore::new(dir.path()),
                writes: AtomicUsize::new(0),
            }
        }
    }

    impl KvStore for CountingKv {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, value)
        }

        fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn install_date_written_once_then_read_back() {
        let dir = TempDir::new().unwrap();
        let kv = FileKvStore::new(dir.path());

        let first = ensure_install_date(&kv, now()).unwrap();
        let second = ensure_install_date(&kv, now() + chrono::Duration::days(10)).unwrap();

        assert_eq!(first, now());
        assert_eq!(second, first);
    }

    #[test]
    fn install_date_storage_written_at_most_once() {
        let dir = TempDir::new().unwrap();
        let kv = CountingKv::new(&dir);

        let first = ensure_install_date(&kv, now()).unwrap();
        let second = ensure_install_date(&kv, now()).unwrap();

        assert_eq!(first, second);
        assert_eq!(kv.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn existing_record_wins_over_now() {
        let dir = TempDir::new().unwrap();
        let kv = FileKvStore::new(dir.path());
        kv.put(INSTALL_DATE_KEY, "2024-12-25T00:00:00+00:00").unwrap();

        let recorded = ensure_install_date(&kv, now()).unwrap();
        assert_eq!(
            recorded,
            Utc.with_ymd_and_hms(2024, 12, 25, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn unparsable_record_is_error_and_left_untouched() {
        let dir = TempDir::new().unwrap();
        let kv = FileKvStore::new(dir.path());
        kv.put(INSTALL_DATE_KEY, "three days ago").unwrap();

        let result = ensure_install_date(&kv, now());
        assert!(matches!(result, Err(StorageError::InvalidRecord { .. })));
        assert_eq!(
            kv.get(INSTALL_DATE_KEY).unwrap().as_deref(),
            Some("three days ago")
        );
    }

    #[test]
    fn app_user_id_format_and_persistence() {
        let dir = TempDir::new().unwrap();
        let kv = FileKvStore::new(dir.path());

        let first = ensure_app_user_id(&kv).unwrap();
        let second = ensure_app_user_id(&kv).unwrap();

        assert!(first.starts_with(APP_USER_ID_PREFIX));
        assert_eq!(first.len(), APP_USER_ID_PREFIX.len() + 36);
        assert_eq!(first, second);
    }

    #[test]
    fn app_user_id_without_prefix_rejected() {
        let dir = TempDir::new().unwrap();
        let kv = FileKvStore::new(dir.path());
        kv.put(APP_USER_ID_KEY, "some-other-id").unwrap();

        let result = ensure_app_user_id(&kv);
        assert!(matches!(result, Err(StorageError::InvalidRecord { .. })));
    }
}
