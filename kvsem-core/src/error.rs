use thiserror::Error;

/// Failures reported by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("store returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("malformed store response: {0}")]
    Protocol(String),
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Rejected semaphore configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ttl must be greater than 0")]
    ZeroTtl,
    #[error("key prefix must not be empty")]
    EmptyPrefix,
    #[error("metadata key must be a single non-empty path segment")]
    InvalidMetadataKey,
    #[error("at least one resource is required")]
    NoResources,
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    #[error("resource '{name}': {reason}")]
    InvalidResource { name: String, reason: String },
    #[error("invalid resource spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SemaphoreError {
    #[error("resources are acquired already")]
    AlreadyAcquired,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("corrupt holder map at '{key}': {source}")]
    CorruptMetadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode holder map: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T, E = SemaphoreError> = std::result::Result<T, E>;
