#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::SemaphoreConfig;
    use crate::infrastructure::KvStoreExt;
    use crate::infrastructure_sqlite::SqliteKvStore;
    use crate::infrastructure_test::tests::*;
    use crate::semaphore::Semaphore;
    use crate::types::ResourceDescriptor;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open(dir: &TempDir, clock: &ManualClock) -> SqliteKvStore {
        let path = dir.path().join("kv.db");
        SqliteKvStore::open_with_clock(path.to_str().unwrap(), Arc::new(clock.clone())).unwrap()
    }

    #[test]
    fn test_sqlite_store_contract() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(1_000);
        let store = open(&dir, &clock);

        check_acquire_is_exclusive(&store);
        check_cas(&store);
        check_listing(&store);
        check_session_expiry(&store, &clock);
        check_lock_delay(&store, &clock);
        check_huge_durations_saturate(&store, &clock);
    }

    #[test]
    fn test_sqlite_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(1_000);
        let config = SemaphoreConfig::new(vec![ResourceDescriptor::new("db", 1, 1)], 30, "locks");

        let mut holder = Semaphore::new(open(&dir, &clock), config.clone()).unwrap();
        assert!(holder.acquire().unwrap().is_success());

        // A second connection to the same file sees the grant
        let mut other = Semaphore::new(open(&dir, &clock), config).unwrap();
        assert!(!other.acquire().unwrap().is_success());

        holder.release();
        assert!(other.acquire().unwrap().is_success());
        assert_eq!(other.store().sessions().unwrap().len(), 1);
    }
}
