use std::sync::Arc;

use crate::error::StoreError;
use crate::types::{KvEntry, PutOptions, SessionInfo, SessionRequest};

/// The session and KV operations the semaphore needs from a store.
///
/// Every call may block on I/O. Implementations must be linearizable per key:
/// `put` with `acquire` or `cas` is the only synchronization the semaphore
/// relies on.
pub trait KvStore {
    /// Create a session lease and return its ID
    fn create_session(&self, request: &SessionRequest) -> Result<String, StoreError>;

    /// Push the session's expiry out by its TTL. `false` if it is gone.
    fn renew_session(&self, session_id: &str) -> Result<bool, StoreError>;

    /// Invalidate a session. Unknown sessions are ignored.
    fn destroy_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// Write a key. `Ok(false)` when an acquire or CAS condition fails.
    fn put(&self, key: &str, value: &[u8], options: &PutOptions) -> Result<bool, StoreError>;

    /// Every key starting with `prefix`, ordered by key
    fn list_recursive(&self, prefix: &str) -> Result<Vec<KvEntry>, StoreError>;

    /// Remove a key. Missing keys are ignored.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Read a single key
    fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        Ok(self
            .list_recursive(key)?
            .into_iter()
            .find(|entry| entry.key == key))
    }
}

/// Extra operations offered by the stores this crate hosts itself.
pub trait KvStoreExt: KvStore {
    /// All live sessions
    fn sessions(&self) -> Result<Vec<SessionInfo>, StoreError>;

    /// Invalidate expired sessions. Returns how many were invalidated.
    fn evict_expired(&self) -> Result<usize, StoreError>;
}

impl<S: KvStore + ?Sized> KvStore for &S {
    fn create_session(&self, request: &SessionRequest) -> Result<String, StoreError> {
        (**self).create_session(request)
    }
    fn renew_session(&self, session_id: &str) -> Result<bool, StoreError> {
        (**self).renew_session(session_id)
    }
    fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        (**self).destroy_session(session_id)
    }
    fn put(&self, key: &str, value: &[u8], options: &PutOptions) -> Result<bool, StoreError> {
        (**self).put(key, value, options)
    }
    fn list_recursive(&self, prefix: &str) -> Result<Vec<KvEntry>, StoreError> {
        (**self).list_recursive(prefix)
    }
    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }
    fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        (**self).get(key)
    }
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn create_session(&self, request: &SessionRequest) -> Result<String, StoreError> {
        (**self).create_session(request)
    }
    fn renew_session(&self, session_id: &str) -> Result<bool, StoreError> {
        (**self).renew_session(session_id)
    }
    fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        (**self).destroy_session(session_id)
    }
    fn put(&self, key: &str, value: &[u8], options: &PutOptions) -> Result<bool, StoreError> {
        (**self).put(key, value, options)
    }
    fn list_recursive(&self, prefix: &str) -> Result<Vec<KvEntry>, StoreError> {
        (**self).list_recursive(prefix)
    }
    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }
    fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        (**self).get(key)
    }
}

impl<S: KvStoreExt + ?Sized> KvStoreExt for Arc<S> {
    fn sessions(&self) -> Result<Vec<SessionInfo>, StoreError> {
        (**self).sessions()
    }
    fn evict_expired(&self) -> Result<usize, StoreError> {
        (**self).evict_expired()
    }
}
