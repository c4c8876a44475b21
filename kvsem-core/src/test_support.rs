//! Store wrapper for tests: records every call and injects faults.

use std::sync::Mutex;

use crate::error::StoreError;
use crate::infrastructure::KvStore;
use crate::types::{KvEntry, PutOptions, SessionRequest};

#[derive(Debug, Clone)]
pub enum Fault {
    /// Acquire-puts on keys containing this text report a held flag
    RejectAcquire(String),
    /// Listings of prefixes containing this text fail at the transport level
    FailList(String),
    /// Another writer touches keys containing this text right before a CAS put
    InterfereBeforeCas(String),
    /// Every delete fails
    FailDelete,
}

pub struct RecordingStore<S: KvStore> {
    pub inner: S,
    calls: Mutex<Vec<String>>,
    faults: Vec<Fault>,
}

impl<S: KvStore> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            faults: Vec::new(),
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl<S: KvStore> KvStore for RecordingStore<S> {
    fn create_session(&self, request: &SessionRequest) -> Result<String, StoreError> {
        self.record("create_session".to_string());
        self.inner.create_session(request)
    }

    fn renew_session(&self, session_id: &str) -> Result<bool, StoreError> {
        self.record(format!("renew_session {}", session_id));
        self.inner.renew_session(session_id)
    }

    fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.record(format!("destroy_session {}", session_id));
        self.inner.destroy_session(session_id)
    }

    fn put(&self, key: &str, value: &[u8], options: &PutOptions) -> Result<bool, StoreError> {
        self.record(format!("put {}", key));
        for fault in &self.faults {
            match fault {
                Fault::RejectAcquire(text) if options.acquire.is_some() && key.contains(text) => {
                    return Ok(false);
                }
                Fault::InterfereBeforeCas(text) if options.cas.is_some() && key.contains(text) => {
                    self.inner
                        .put(key, br#"{"limit":1,"sessions":{}}"#, &PutOptions::default())?;
                }
                _ => {}
            }
        }
        self.inner.put(key, value, options)
    }

    fn list_recursive(&self, prefix: &str) -> Result<Vec<KvEntry>, StoreError> {
        self.record(format!("list {}", prefix));
        for fault in &self.faults {
            if let Fault::FailList(text) = fault {
                if prefix.contains(text) {
                    return Err(StoreError::Transport("connection reset".to_string()));
                }
            }
        }
        self.inner.list_recursive(prefix)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.record(format!("delete {}", key));
        if self.faults.iter().any(|f| matches!(f, Fault::FailDelete)) {
            return Err(StoreError::Transport("connection reset".to_string()));
        }
        self.inner.delete(key)
    }
}
