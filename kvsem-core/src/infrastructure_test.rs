#[cfg(test)]
pub(crate) mod tests {
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::infrastructure::{KvStore, KvStoreExt};
    use crate::infrastructure_in_memory::InMemoryKvStore;
    use crate::types::{PutOptions, SessionBehavior, SessionRequest};
    use std::sync::Arc;
    use std::time::Duration;

    fn session(ttl_secs: u64) -> SessionRequest {
        SessionRequest::new("test", Duration::from_secs(ttl_secs))
    }

    // Checks shared with the SQLite backend

    pub(crate) fn check_acquire_is_exclusive(store: &impl KvStore) {
        let s1 = store.create_session(&session(10)).unwrap();
        let s2 = store.create_session(&session(10)).unwrap();

        assert!(store.put("flag", b"", &PutOptions::acquire(&s1)).unwrap());
        assert!(!store.put("flag", b"", &PutOptions::acquire(&s2)).unwrap());
        // Re-acquiring by the holder is fine
        assert!(store.put("flag", b"x", &PutOptions::acquire(&s1)).unwrap());

        let entry = store.get("flag").unwrap().unwrap();
        assert_eq!(entry.session.as_deref(), Some(s1.as_str()));
        assert_eq!(entry.value, b"x".to_vec());
        assert_eq!(entry.lock_index, 1);

        assert!(matches!(
            store.put("other", b"", &PutOptions::acquire("nope")),
            Err(StoreError::InvalidSession(_))
        ));
    }

    pub(crate) fn check_cas(store: &impl KvStore) {
        assert!(store.put("meta", b"v1", &PutOptions::cas(0)).unwrap());
        assert!(!store.put("meta", b"v2", &PutOptions::cas(0)).unwrap());

        let index = store.get("meta").unwrap().unwrap().modify_index;
        assert!(!store.put("meta", b"v2", &PutOptions::cas(index + 100)).unwrap());
        assert!(store.put("meta", b"v2", &PutOptions::cas(index)).unwrap());

        let entry = store.get("meta").unwrap().unwrap();
        assert!(entry.modify_index > index);
        assert_eq!(entry.create_index, index);
        assert_eq!(entry.value, b"v2".to_vec());
    }

    pub(crate) fn check_listing(store: &impl KvStore) {
        for key in ["p/db/b", "p/db/a", "p/db2/a", "p/dc"] {
            store.put(key, key.as_bytes(), &PutOptions::default()).unwrap();
        }

        let keys: Vec<String> = store
            .list_recursive("p/db/")
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["p/db/a", "p/db/b"]);
        assert_eq!(store.list_recursive("p/").unwrap().len(), 4);
        assert!(store.list_recursive("q/").unwrap().is_empty());

        store.delete("p/db/a").unwrap();
        store.delete("p/db/a").unwrap();
        assert_eq!(store.list_recursive("p/db/").unwrap().len(), 1);
    }

    pub(crate) fn check_session_expiry(store: &impl KvStore, clock: &ManualClock) {
        let deleting = store.create_session(&session(10)).unwrap();
        let releasing = store
            .create_session(&session(10).with_behavior(SessionBehavior::Release))
            .unwrap();
        store.put("d", b"", &PutOptions::acquire(&deleting)).unwrap();
        store.put("r", b"", &PutOptions::acquire(&releasing)).unwrap();

        clock.advance(Duration::from_secs(5));
        assert!(store.renew_session(&deleting).unwrap());
        assert!(store.renew_session(&releasing).unwrap());

        clock.advance(Duration::from_secs(11));
        assert!(!store.renew_session(&deleting).unwrap());
        assert!(store.get("d").unwrap().is_none());

        let released = store.get("r").unwrap().unwrap();
        assert!(released.session.is_none());
    }

    pub(crate) fn check_lock_delay(store: &impl KvStore, clock: &ManualClock) {
        let holder = store
            .create_session(&session(10).with_lock_delay(Duration::from_secs(5)))
            .unwrap();
        store.put("l", b"", &PutOptions::acquire(&holder)).unwrap();
        store.destroy_session(&holder).unwrap();
        store.destroy_session(&holder).unwrap();

        let next = store.create_session(&session(60)).unwrap();
        assert!(!store.put("l", b"", &PutOptions::acquire(&next)).unwrap());

        clock.advance(Duration::from_secs(6));
        assert!(store.put("l", b"", &PutOptions::acquire(&next)).unwrap());
    }

    pub(crate) fn check_huge_durations_saturate(store: &impl KvStoreExt, clock: &ManualClock) {
        let request = SessionRequest::new("test", Duration::MAX).with_lock_delay(Duration::MAX);
        let id = store.create_session(&request).unwrap();
        assert!(store.renew_session(&id).unwrap());
        assert!(store.put("huge", b"", &PutOptions::acquire(&id)).unwrap());

        clock.advance(Duration::from_secs(86_400 * 365));
        assert_eq!(store.evict_expired().unwrap(), 0);
        store.destroy_session(&id).unwrap();
        assert!(store.sessions().unwrap().iter().all(|s| s.id != id));
    }

    fn store() -> (InMemoryKvStore, ManualClock) {
        let clock = ManualClock::new(1_000);
        (InMemoryKvStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_in_memory_acquire_is_exclusive() {
        check_acquire_is_exclusive(&store().0);
    }

    #[test]
    fn test_in_memory_cas() {
        check_cas(&store().0);
    }

    #[test]
    fn test_in_memory_listing() {
        check_listing(&store().0);
    }

    #[test]
    fn test_in_memory_session_expiry() {
        let (store, clock) = store();
        check_session_expiry(&store, &clock);
    }

    #[test]
    fn test_in_memory_lock_delay() {
        let (store, clock) = store();
        check_lock_delay(&store, &clock);
    }

    #[test]
    fn test_in_memory_huge_durations_saturate() {
        let (store, clock) = store();
        check_huge_durations_saturate(&store, &clock);
    }

    #[test]
    fn test_in_memory_eviction_count() {
        let (store, clock) = store();
        store.create_session(&session(1)).unwrap();
        store.create_session(&session(0)).unwrap();

        assert_eq!(store.evict_expired().unwrap(), 0);
        clock.advance(Duration::from_secs(2));
        assert_eq!(store.evict_expired().unwrap(), 1);

        // The TTL-less session never expires
        assert_eq!(store.sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_in_memory_clones_share_state() {
        let (a, _) = store();
        let b = a.clone();
        a.put("k", b"v", &PutOptions::default()).unwrap();
        assert_eq!(b.get("k").unwrap().unwrap().value, b"v".to_vec());
    }
}
