use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The per-resource record of which sessions hold how many slots.
///
/// Stored under the resource's metadata key and rewritten with a CAS guard.
/// Sessions are kept sorted so the encoded form is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderMap {
    /// Maximum total slots across all holders
    pub limit: u64,
    /// Session ID -> granted slots
    #[serde(default)]
    pub sessions: BTreeMap<String, u64>,
}

impl HolderMap {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            sessions: BTreeMap::new(),
        }
    }

    /// Total slots currently recorded as held, or `None` if the grants
    /// overflow a `u64`.
    pub fn checked_held(&self) -> Option<u64> {
        self.sessions
            .values()
            .try_fold(0u64, |sum, granted| sum.checked_add(*granted))
    }

    /// Total slots currently recorded as held, saturating at `u64::MAX`.
    pub fn held(&self) -> u64 {
        self.checked_held().unwrap_or(u64::MAX)
    }

    /// Slots still free. Zero when the map is already over its limit.
    pub fn available(&self) -> u64 {
        self.limit.saturating_sub(self.held())
    }

    pub fn is_within_limit(&self) -> bool {
        self.checked_held().is_some_and(|held| held <= self.limit)
    }
}
