use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{ResourceDescriptor, SessionBehavior};

/// Sub-key under each resource prefix that holds the holder map.
pub const DEFAULT_METADATA_KEY: &str = ".semaphore";

/// Name given to the session lease.
pub const DEFAULT_SESSION_NAME: &str = "semaphore";

/// Everything a semaphore needs besides its store.
///
/// Keys are laid out as `{key_prefix}/{resource}/{session_id}` for flag
/// entries and `{key_prefix}/{resource}/{metadata_key}` for holder maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreConfig {
    /// Order matters: earlier resources are claimed first
    pub resources: Vec<ResourceDescriptor>,
    /// Session lease TTL in seconds
    pub ttl_secs: u64,
    pub key_prefix: String,
    #[serde(default = "default_session_name")]
    pub session_name: String,
    #[serde(default = "default_metadata_key")]
    pub metadata_key: String,
    /// What the store does with our flag entries if the lease expires
    #[serde(default)]
    pub session_behavior: SessionBehavior,
}

fn default_session_name() -> String {
    DEFAULT_SESSION_NAME.to_string()
}

fn default_metadata_key() -> String {
    DEFAULT_METADATA_KEY.to_string()
}

impl SemaphoreConfig {
    pub fn new(
        resources: Vec<ResourceDescriptor>,
        ttl_secs: u64,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            resources,
            ttl_secs,
            key_prefix: key_prefix.into(),
            session_name: default_session_name(),
            metadata_key: default_metadata_key(),
            session_behavior: SessionBehavior::default(),
        }
    }

    pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = session_name.into();
        self
    }

    pub fn with_metadata_key(mut self, metadata_key: impl Into<String>) -> Self {
        self.metadata_key = metadata_key.into();
        self
    }

    pub fn with_session_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.session_behavior = behavior;
        self
    }

    /// Checks every field and trims separators off the key prefix.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::ZeroTtl);
        }

        self.key_prefix = self.key_prefix.trim_matches('/').to_string();
        if self.key_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }

        if self.metadata_key.is_empty() || self.metadata_key.contains('/') {
            return Err(ConfigError::InvalidMetadataKey);
        }

        if self.resources.is_empty() {
            return Err(ConfigError::NoResources);
        }

        let mut seen = HashSet::new();
        for resource in &self.resources {
            resource.validate()?;
            if resource.name == self.metadata_key {
                return Err(ConfigError::InvalidResource {
                    name: resource.name.clone(),
                    reason: "name collides with the metadata key".to_string(),
                });
            }
            if !seen.insert(resource.name.as_str()) {
                return Err(ConfigError::DuplicateResource(resource.name.clone()));
            }
        }

        Ok(self)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Prefix listed during reconciliation. Ends with `/` so `db` never
    /// matches keys of `db2`.
    pub fn resource_prefix(&self, resource: &ResourceDescriptor) -> String {
        format!("{}/{}/", self.key_prefix, resource.name)
    }

    pub fn flag_key(&self, resource: &ResourceDescriptor, session_id: &str) -> String {
        format!("{}{}", self.resource_prefix(resource), session_id)
    }

    pub fn holder_map_key(&self, resource: &ResourceDescriptor) -> String {
        format!("{}{}", self.resource_prefix(resource), self.metadata_key)
    }
}
