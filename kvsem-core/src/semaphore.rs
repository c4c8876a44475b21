//! The semaphore coordinator.
//!
//! One acquisition claims every configured resource or none of them. For
//! each resource the coordinator takes a flag entry bound to its session,
//! rebuilds the holder map from the flags that are still alive, and writes
//! it back with a CAS guard. Any failure rolls the whole attempt back.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::SemaphoreConfig;
use crate::error::{Result, SemaphoreError};
use crate::infrastructure::KvStore;
use crate::types::{
    HolderMap, PutOptions, ResourceDescriptor, ResourceOutcome, SessionRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SemaphoreState {
    /// No session held
    Idle,
    /// Session created, resources being claimed
    Acquiring,
    /// Every resource granted
    Acquired,
}

/// Why an acquisition attempt was turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquireFailureReason {
    /// Another live session holds the flag entry
    FlagConflict,
    /// No slots left under the limit
    InsufficientCapacity,
    /// The holder map changed between read and write
    CasConflict,
}

/// Result of a completed acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquireResult {
    Success {
        outcomes: Vec<ResourceOutcome>,
    },
    /// Already rolled back; every outcome reports zero slots
    Failure {
        resource: String,
        reason: AcquireFailureReason,
        outcomes: Vec<ResourceOutcome>,
    },
}

impl AcquireResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AcquireResult::Success { .. })
    }

    pub fn outcomes(&self) -> &[ResourceOutcome] {
        match self {
            AcquireResult::Success { outcomes } | AcquireResult::Failure { outcomes, .. } => {
                outcomes
            }
        }
    }
}

/// Holder map of one resource as currently stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub name: String,
    pub key: String,
    /// `None` if no holder map has been written yet
    pub holder_map: Option<HolderMap>,
    pub modify_index: u64,
}

enum Attempt {
    Granted(u64),
    Denied(AcquireFailureReason),
}

/// Deletes the attempt's flag entries and destroys its session when dropped,
/// unless disarmed. Covers early returns, `?` and panics alike.
struct RollbackGuard<'a, S: KvStore> {
    store: &'a S,
    flag_keys: Vec<String>,
    session_id: &'a str,
    armed: bool,
}

impl<S: KvStore> RollbackGuard<'_, S> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S: KvStore> Drop for RollbackGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            rollback(self.store, &self.flag_keys, self.session_id);
        }
    }
}

/// Best effort: failures are logged and never replace the caller's result.
fn rollback<S: KvStore>(store: &S, flag_keys: &[String], session_id: &str) {
    for key in flag_keys {
        if let Err(e) = store.delete(key) {
            warn!(key = %key, session_id = %session_id, error = %e, "Failed to delete flag entry");
        }
    }
    if let Err(e) = store.destroy_session(session_id) {
        warn!(session_id = %session_id, error = %e, "Failed to destroy session");
    }
}

/// A counting semaphore over one or more resources, backed by a [`KvStore`].
///
/// Not reentrant: operations take `&mut self` and run on the caller's thread.
/// Lease renewal is the caller's job; see [`Semaphore::renew`].
pub struct Semaphore<S: KvStore> {
    store: S,
    config: SemaphoreConfig,
    session_id: Option<String>,
    state: SemaphoreState,
    outcomes: Vec<ResourceOutcome>,
}

impl<S: KvStore> Semaphore<S> {
    /// Validates `config` and builds an idle semaphore.
    pub fn new(store: S, config: SemaphoreConfig) -> Result<Self> {
        let config = config.validate()?;
        let outcomes = zeroed(&config.resources);
        Ok(Self {
            store,
            config,
            session_id: None,
            state: SemaphoreState::Idle,
            outcomes,
        })
    }

    pub fn state(&self) -> SemaphoreState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn config(&self) -> &SemaphoreConfig {
        &self.config
    }

    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.config.resources
    }

    /// Grants from the last attempt; zero after a failure or a release.
    pub fn outcomes(&self) -> &[ResourceOutcome] {
        &self.outcomes
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claims every configured resource, or none.
    ///
    /// A refused claim is `Ok(AcquireResult::Failure)`; store and decoding
    /// problems are `Err`. Both leave the semaphore idle with nothing held.
    pub fn acquire(&mut self) -> Result<AcquireResult> {
        if self.session_id.is_some() {
            return Err(SemaphoreError::AlreadyAcquired);
        }

        let request = SessionRequest::new(self.config.session_name.clone(), self.config.ttl())
            .with_behavior(self.config.session_behavior);
        let session_id = self.store.create_session(&request)?;
        debug!(session_id = %session_id, ttl = self.config.ttl_secs, "Session created");

        self.state = SemaphoreState::Acquiring;

        let result = {
            let mut guard = RollbackGuard {
                store: &self.store,
                flag_keys: self.flag_keys(&session_id),
                session_id: &session_id,
                armed: true,
            };
            let result = self.acquire_resources(&session_id);
            if matches!(result, Ok(AcquireResult::Success { .. })) {
                guard.disarm();
            }
            result
        };

        match &result {
            Ok(AcquireResult::Success { outcomes }) => {
                info!(session_id = %session_id, resources = outcomes.len(), "Resources acquired");
                self.outcomes = outcomes.clone();
                self.session_id = Some(session_id);
                self.state = SemaphoreState::Acquired;
            }
            Ok(AcquireResult::Failure { resource, reason, .. }) => {
                info!(session_id = %session_id, resource = %resource, reason = ?reason, "Acquisition rolled back");
                self.reset();
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Acquisition failed");
                self.reset();
            }
        }

        result
    }

    /// Extends the session TTL. `false` when no session is held or the
    /// store no longer knows it.
    pub fn renew(&self) -> Result<bool> {
        let Some(session_id) = &self.session_id else {
            return Ok(false);
        };
        let renewed = self.store.renew_session(session_id)?;
        if !renewed {
            warn!(session_id = %session_id, "Session could not be renewed");
        }
        Ok(renewed)
    }

    /// Gives up every slot. Does nothing without a session.
    pub fn release(&mut self) {
        let Some(session_id) = self.session_id.take() else {
            return;
        };
        rollback(&self.store, &self.flag_keys(&session_id), &session_id);
        info!(session_id = %session_id, "Resources released");
        self.reset();
    }

    /// Reads the current holder map of every configured resource.
    pub fn holder_maps(&self) -> Result<Vec<ResourceStatus>> {
        self.config
            .resources
            .iter()
            .map(|resource| -> Result<ResourceStatus> {
                let key = self.config.holder_map_key(resource);
                let entry = self.store.get(&key)?;
                let (holder_map, modify_index) = match entry {
                    Some(entry) => (Some(decode(&key, &entry.value)?), entry.modify_index),
                    None => (None, 0),
                };
                Ok(ResourceStatus {
                    name: resource.name.clone(),
                    key,
                    holder_map,
                    modify_index,
                })
            })
            .collect()
    }

    fn reset(&mut self) {
        self.session_id = None;
        self.state = SemaphoreState::Idle;
        self.outcomes = zeroed(&self.config.resources);
    }

    fn flag_keys(&self, session_id: &str) -> Vec<String> {
        self.config
            .resources
            .iter()
            .map(|resource| self.config.flag_key(resource, session_id))
            .collect()
    }

    fn acquire_resources(&self, session_id: &str) -> Result<AcquireResult> {
        let mut outcomes = Vec::with_capacity(self.config.resources.len());

        for resource in &self.config.resources {
            match self.acquire_resource(resource, session_id)? {
                Attempt::Granted(granted) => {
                    outcomes.push(ResourceOutcome::new(&resource.name, granted));
                }
                Attempt::Denied(reason) => {
                    return Ok(AcquireResult::Failure {
                        resource: resource.name.clone(),
                        reason,
                        outcomes: zeroed(&self.config.resources),
                    });
                }
            }
        }

        Ok(AcquireResult::Success { outcomes })
    }

    fn acquire_resource(&self, resource: &ResourceDescriptor, session_id: &str) -> Result<Attempt> {
        let flag_key = self.config.flag_key(resource, session_id);
        if !self
            .store
            .put(&flag_key, b"", &PutOptions::acquire(session_id))?
        {
            warn!(resource = %resource.name, session_id = %session_id, "Flag entry held by another session");
            return Ok(Attempt::Denied(AcquireFailureReason::FlagConflict));
        }

        let holder_key = self.config.holder_map_key(resource);
        let entries = self
            .store
            .list_recursive(&self.config.resource_prefix(resource))?;

        let (previous, revision) = match entries.iter().find(|e| e.key == holder_key) {
            Some(entry) => (Some(decode(&holder_key, &entry.value)?), entry.modify_index),
            None => (None, 0),
        };

        if let Some(previous) = &previous {
            if previous.limit != resource.limit {
                warn!(
                    resource = %resource.name,
                    stored = previous.limit,
                    configured = resource.limit,
                    "Holder map limit differs from configuration, using configured limit"
                );
            }
        }

        let mut next = HolderMap::new(resource.limit);
        for entry in entries.iter().filter(|e| e.key != holder_key) {
            match &entry.session {
                Some(holder) => {
                    let granted = previous
                        .as_ref()
                        .and_then(|map| map.sessions.get(holder));
                    if let Some(granted) = granted {
                        next.sessions.insert(holder.clone(), *granted);
                    }
                }
                None => {
                    debug!(resource = %resource.name, key = %entry.key, "Pruning stale flag entry");
                    self.store.delete(&entry.key)?;
                }
            }
        }

        let granted = resource.requested_slots.min(next.available());
        if granted == 0 {
            warn!(
                resource = %resource.name,
                limit = next.limit,
                held = next.held(),
                "No slots available"
            );
            return Ok(Attempt::Denied(AcquireFailureReason::InsufficientCapacity));
        }

        next.sessions.insert(session_id.to_string(), granted);
        let value = codec::encode(&next).map_err(SemaphoreError::Encode)?;
        if !self.store.put(&holder_key, &value, &PutOptions::cas(revision))? {
            warn!(resource = %resource.name, revision, "Holder map changed concurrently");
            return Ok(Attempt::Denied(AcquireFailureReason::CasConflict));
        }

        debug!(resource = %resource.name, session_id = %session_id, granted, "Slots granted");
        Ok(Attempt::Granted(granted))
    }
}

fn decode(key: &str, value: &[u8]) -> Result<HolderMap> {
    codec::decode(value).map_err(|source| SemaphoreError::CorruptMetadata {
        key: key.to_string(),
        source,
    })
}

fn zeroed(resources: &[ResourceDescriptor]) -> Vec<ResourceOutcome> {
    resources
        .iter()
        .map(|resource| ResourceOutcome::new(&resource.name, 0))
        .collect()
}
