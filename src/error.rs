//! Error types for rollwin.

use thiserror::Error;

/// Failure of a single store batch.
///
/// A batch either applies completely or not at all, so one error covers the
/// whole batch; no individual step result is trusted once this is returned.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing Redis connection or command failed
    #[error("Redis error: {0}")]
    Backend(#[from] redis::RedisError),

    /// The store refused or could not run the batch
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store replied, but not with what the batch step asked for
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

/// Main error type for rollwin operations.
#[derive(Error, Debug)]
pub enum RollwinError {
    /// The atomic batch could not be submitted, committed or read back
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rollwin operations.
pub type Result<T> = std::result::Result<T, RollwinError>;
