use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ConfigError;

/// A named resource, its capacity, and how many slots this process wants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    /// Maximum total slots across all holders
    pub limit: u64,
    /// Slots this process asks for
    #[serde(default = "default_requested_slots")]
    pub requested_slots: u64,
}

fn default_requested_slots() -> u64 {
    1
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, limit: u64, requested_slots: u64) -> Self {
        Self {
            name: name.into(),
            limit,
            requested_slots,
        }
    }

    /// Checks the descriptor on its own; uniqueness is checked by the config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidResource {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name is required"));
        }
        if self.name.contains('/') || self.name.chars().any(char::is_whitespace) {
            return Err(invalid("name must not contain '/' or whitespace"));
        }
        if self.limit == 0 {
            return Err(invalid("limit must be greater than 0"));
        }
        if self.requested_slots == 0 {
            return Err(invalid("requested slots must be greater than 0"));
        }
        Ok(())
    }
}

/// Parses `name:limit` or `name:limit:slots` (slots default to 1).
impl FromStr for ResourceDescriptor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidSpec {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.split(':').collect();
        let (name, limit, slots) = match parts.as_slice() {
            [name, limit] => (*name, *limit, None),
            [name, limit, slots] => (*name, *limit, Some(*slots)),
            _ => return Err(invalid("expected name:limit[:slots]")),
        };

        let limit = limit
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid("limit is not a number"))?;
        let requested_slots = match slots {
            Some(slots) => slots
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid("slots is not a number"))?,
            None => default_requested_slots(),
        };

        let descriptor = ResourceDescriptor::new(name.trim(), limit, requested_slots);
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Slots granted for one resource by an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub name: String,
    pub granted_slots: u64,
}

impl ResourceOutcome {
    pub fn new(name: impl Into<String>, granted_slots: u64) -> Self {
        Self {
            name: name.into(),
            granted_slots,
        }
    }
}
