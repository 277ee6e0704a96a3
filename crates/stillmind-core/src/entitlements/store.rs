//! Last-known subscription state: in memory, persisted, observable.

use std::sync::{Arc, Mutex};

use crate::storage::KvStore;

use super::state::SubscriptionState;

/// KV key under which the subscription record is persisted.
pub const SUBSCRIPTION_STATE_KEY: &str = "subscription_state";

type Listener = Box<dyn Fn(&SubscriptionState) + Send + Sync>;

/// Holds the last reconciled [`SubscriptionState`] and tells subscribers
/// about every new one.
///
/// The store is passive: reconciliation decides values, the store keeps the
/// latest one synchronously readable and durable when storage cooperates.
/// Callbacks run on the reconciling task; they should return quickly and
/// must not call back into the store.
pub struct SubscriptionStore {
    kv: Arc<dyn KvStore>,
    current: Mutex<SubscriptionState>,
    listeners: Mutex<Vec<Listener>>,
}

impl SubscriptionStore {
    /// New store starting at "no access".
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            current: Mutex::new(SubscriptionState::none()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Load the persisted record into memory, if one exists and is sound.
    ///
    /// Called before the first reconciliation so callers have an immediate
    /// (possibly stale) value. A read failure or a corrupt record means
    /// "no prior state".
    pub fn load_initial(&self) {
        match self.kv.get_json::<SubscriptionState>(SUBSCRIPTION_STATE_KEY) {
            Ok(Some(state)) if state.is_valid() => {
                *self.current.lock().unwrap() = state;
            }
            Ok(Some(_)) => {
                tracing::warn!("discarding persisted subscription state: invariants violated");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("failed to read persisted subscription state: {}", e);
            }
        }
    }

    /// Last known state, synchronously.
    pub fn get(&self) -> SubscriptionState {
        self.current.lock().unwrap().clone()
    }

    /// Register a callback fired on every newly set state.
    ///
    /// Notification is idempotent: setting an equal value fires again.
    pub fn subscribe(&self, listener: impl Fn(&SubscriptionState) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    /// Persist and publish a newly reconciled state.
    ///
    /// A write failure is logged but does not stop the in-memory update or
    /// the notifications; the state is then correct for this session only.
    pub fn set(&self, state: SubscriptionState) {
        if let Err(e) = self.kv.put_json(SUBSCRIPTION_STATE_KEY, &state) {
            tracing::warn!("failed to persist subscription state: {}", e);
        }
        *self.current.lock().unwrap() = state.clone();
        for listener in self.listeners.lock().unwrap().iter() {
            listener(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::FileKvStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn trial_state() -> SubscriptionState {
        let start = chrono::Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        SubscriptionState::local_trial(start, start + chrono::Duration::days(3))
    }

    #[test]
    fn starts_as_no_access() {
        let dir = TempDir::new().unwrap();
        let store = SubscriptionStore::new(Arc::new(FileKvStore::new(dir.path())));
        assert_eq!(store.get(), SubscriptionState::none());
    }

    #[test]
    fn load_initial_restores_persisted_record() {
        let dir = TempDir::new().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
        kv.put_json(SUBSCRIPTION_STATE_KEY, &trial_state()).unwrap();

        let store = SubscriptionStore::new(kv);
        store.load_initial();
        assert_eq!(store.get(), trial_state());
    }

    #[test]
    fn load_initial_treats_unreadable_record_as_no_prior_state() {
        let dir = TempDir::new().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
        kv.put(SUBSCRIPTION_STATE_KEY, "{{ not json").unwrap();

        let store = SubscriptionStore::new(kv);
        store.load_initial();
        assert_eq!(store.get(), SubscriptionState::none());
    }

    #[test]
    fn load_initial_discards_record_violating_invariants() {
        let dir = TempDir::new().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
        kv.put(
            SUBSCRIPTION_STATE_KEY,
            r#"{"isSubscribed":false,"isFreeTrial":true,"expiryDate":null,"planId":"trial","originalPurchaseDate":null}"#,
        )
        .unwrap();

        let store = SubscriptionStore::new(kv);
        store.load_initial();
        assert_eq!(store.get(), SubscriptionState::none());
    }

    #[test]
    fn set_persists_updates_memory_and_notifies() {
        let dir = TempDir::new().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
        let store = SubscriptionStore::new(kv.clone());

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_listener = seen.clone();
        store.subscribe(move |state| {
            assert!(state.is_subscribed);
            seen_in_listener.fetch_add(1, Ordering::SeqCst);
        });

        store.set(trial_state());

        assert_eq!(store.get(), trial_state());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let persisted: SubscriptionState = kv
            .get_json(SUBSCRIPTION_STATE_KEY)
            .unwrap()
            .expect("record should be persisted");
        assert_eq!(persisted, trial_state());
    }

    #[test]
    fn setting_an_equal_value_notifies_again() {
        let dir = TempDir::new().unwrap();
        let store = SubscriptionStore::new(Arc::new(FileKvStore::new(dir.path())));

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_listener = seen.clone();
        store.subscribe(move |_| {
            seen_in_listener.fetch_add(1, Ordering::SeqCst);
        });

        store.set(trial_state());
        store.set(trial_state());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    /// KvStore whose writes always fail, for the degraded-write path.
    struct ReadOnlyKv;

    impl KvStore for ReadOnlyKv {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn put(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::WriteFailed {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_still_updates_memory_and_notifies() {
        let store = SubscriptionStore::new(Arc::new(ReadOnlyKv));

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_listener = seen.clone();
        store.subscribe(move |_| {
            seen_in_listener.fetch_add(1, Ordering::SeqCst);
        });

        store.set(trial_state());

        assert_eq!(store.get(), trial_state());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
