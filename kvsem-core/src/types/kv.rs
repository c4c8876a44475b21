use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the store does with keys a session holds when the session is
/// invalidated (destroyed or expired).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    /// Keep the key, drop its session attribute
    Release,
    /// Remove the key
    #[default]
    Delete,
}

impl SessionBehavior {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionBehavior::Release => "release",
            SessionBehavior::Delete => "delete",
        }
    }
}

impl std::fmt::Display for SessionBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for creating a session lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub name: String,
    /// How long a released lock stays unacquirable after invalidation
    pub lock_delay: Duration,
    /// Zero means the session never expires on its own
    pub ttl: Duration,
    pub behavior: SessionBehavior,
}

impl SessionRequest {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            lock_delay: Duration::ZERO,
            ttl,
            behavior: SessionBehavior::default(),
        }
    }

    pub fn with_lock_delay(mut self, lock_delay: Duration) -> Self {
        self.lock_delay = lock_delay;
        self
    }

    pub fn with_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

/// A live session as reported by a local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub behavior: SessionBehavior,
    pub lock_delay_ms: u64,
    pub ttl_ms: u64,
    /// Zero for sessions without a TTL
    pub expires_at: u64,
}

/// Conditions attached to a KV write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Acquire the key for this session; fails if another session holds it
    pub acquire: Option<String>,
    /// Only write if the key's modify index equals this value.
    /// `Some(0)` means the key must not exist yet.
    pub cas: Option<u64>,
}

impl PutOptions {
    pub fn acquire(session_id: impl Into<String>) -> Self {
        Self {
            acquire: Some(session_id.into()),
            cas: None,
        }
    }

    pub fn cas(index: u64) -> Self {
        Self {
            acquire: None,
            cas: Some(index),
        }
    }
}

/// One key as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub create_index: u64,
    /// Revision used for CAS
    pub modify_index: u64,
    /// Number of times the key has been acquired
    pub lock_index: u64,
    /// Holding session, if any
    pub session: Option<String>,
}
