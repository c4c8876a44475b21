use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::{millis, Clock, SystemClock};
use crate::error::StoreError;
use crate::infrastructure::{KvStore, KvStoreExt};
use crate::types::{KvEntry, PutOptions, SessionBehavior, SessionInfo, SessionRequest};

struct StoredValue {
    value: Vec<u8>,
    create_index: u64,
    modify_index: u64,
    lock_index: u64,
    session: Option<String>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, StoredValue>,
    sessions: HashMap<String, SessionInfo>,
    // Key -> time until which it cannot be acquired
    lock_delays: HashMap<String, u64>,
    index: u64,
}

impl State {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn invalidate_session(&mut self, session_id: &str, now: u64) -> bool {
        let Some(session) = self.sessions.remove(session_id) else {
            return false;
        };

        let held: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, v)| v.session.as_deref() == Some(session_id))
            .map(|(k, _)| k.clone())
            .collect();

        for key in held {
            if session.lock_delay_ms > 0 {
                self.lock_delays
                    .insert(key.clone(), now.saturating_add(session.lock_delay_ms));
            }
            match session.behavior {
                SessionBehavior::Delete => {
                    self.entries.remove(&key);
                }
                SessionBehavior::Release => {
                    let index = self.next_index();
                    if let Some(stored) = self.entries.get_mut(&key) {
                        stored.session = None;
                        stored.modify_index = index;
                    }
                }
            }
        }
        true
    }

    fn evict_expired(&mut self, now: u64) -> usize {
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.expires_at != 0 && s.expires_at < now)
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            self.invalidate_session(id, now);
        }
        self.lock_delays.retain(|_, until| *until > now);
        expired.len()
    }
}

/// A store kept in process memory.
///
/// Clones share the same data, so several semaphores (or threads) can
/// contend on one instance the way separate processes contend on a server.
#[derive(Clone)]
pub struct InMemoryKvStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    /// Locks the state and drops sessions whose TTL has lapsed.
    fn lock(&self) -> (MutexGuard<'_, State>, u64) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.evict_expired(now);
        (state, now)
    }

    /// Number of keys in the store
    pub fn len(&self) -> usize {
        self.lock().0.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for InMemoryKvStore {
    fn create_session(&self, request: &SessionRequest) -> Result<String, StoreError> {
        let (mut state, now) = self.lock();
        let id = nanoid::nanoid!();
        let ttl_ms = millis(request.ttl);

        state.sessions.insert(
            id.clone(),
            SessionInfo {
                id: id.clone(),
                name: request.name.clone(),
                behavior: request.behavior,
                lock_delay_ms: millis(request.lock_delay),
                ttl_ms,
                expires_at: if ttl_ms == 0 { 0 } else { now.saturating_add(ttl_ms) },
            },
        );
        Ok(id)
    }

    fn renew_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let (mut state, now) = self.lock();
        match state.sessions.get_mut(session_id) {
            Some(session) => {
                if session.ttl_ms != 0 {
                    session.expires_at = now.saturating_add(session.ttl_ms);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        let (mut state, now) = self.lock();
        state.invalidate_session(session_id, now);
        Ok(())
    }

    fn put(&self, key: &str, value: &[u8], options: &PutOptions) -> Result<bool, StoreError> {
        let (mut state, now) = self.lock();

        if let Some(expected) = options.cas {
            let current = state.entries.get(key).map(|v| v.modify_index);
            let matches = match (expected, current) {
                (0, None) => true,
                (expected, Some(current)) => expected == current,
                _ => false,
            };
            if !matches {
                return Ok(false);
            }
        }

        let mut acquired_now = false;
        if let Some(session_id) = &options.acquire {
            if !state.sessions.contains_key(session_id) {
                return Err(StoreError::InvalidSession(session_id.clone()));
            }
            let holder = state.entries.get(key).and_then(|v| v.session.as_deref());
            match holder {
                Some(holder) if holder == session_id => {}
                Some(_) => return Ok(false),
                None => {
                    if state.lock_delays.get(key).is_some_and(|until| *until > now) {
                        return Ok(false);
                    }
                    acquired_now = true;
                }
            }
        }

        let index = state.next_index();
        let stored = state
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue {
                value: Vec::new(),
                create_index: index,
                modify_index: index,
                lock_index: 0,
                session: None,
            });
        stored.value = value.to_vec();
        stored.modify_index = index;
        if acquired_now {
            stored.lock_index += 1;
            stored.session = options.acquire.clone();
        }
        Ok(true)
    }

    fn list_recursive(&self, prefix: &str) -> Result<Vec<KvEntry>, StoreError> {
        let (state, _) = self.lock();
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, stored)| KvEntry {
                key: key.clone(),
                value: stored.value.clone(),
                create_index: stored.create_index,
                modify_index: stored.modify_index,
                lock_index: stored.lock_index,
                session: stored.session.clone(),
            })
            .collect())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let (mut state, _) = self.lock();
        if state.entries.remove(key).is_some() {
            state.next_index();
        }
        Ok(())
    }
}

impl KvStoreExt for InMemoryKvStore {
    fn sessions(&self) -> Result<Vec<SessionInfo>, StoreError> {
        let (state, _) = self.lock();
        let mut sessions: Vec<SessionInfo> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.evict_expired(now))
    }
}
