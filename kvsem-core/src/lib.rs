//! # kvsem-core
//!
//! A distributed, multi-resource counting semaphore coordinated through a
//! key-value store with session leases and compare-and-swap writes.
//! Processes reserve slots of one or more named resources; the store is the
//! single source of truth for who holds how many.

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod infrastructure;
#[cfg(feature = "consul")]
#[path = "infrastructure_consul.rs"]
pub mod infrastructure_consul;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod semaphore;
pub mod types;
pub mod wire;

pub use error::{ConfigError, Result, SemaphoreError, StoreError};

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod codec_test;
#[cfg(test)]
#[path = "infrastructure_test.rs"]
mod infrastructure_test;
#[cfg(all(test, feature = "consul"))]
#[path = "infrastructure_consul_test.rs"]
mod infrastructure_consul_test;
#[cfg(all(test, feature = "sqlite"))]
#[path = "infrastructure_sqlite_test.rs"]
mod infrastructure_sqlite_test;
