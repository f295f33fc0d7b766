//! Crate-wide error type.
//!
//! Foreground operations surface these errors to their immediate caller;
//! faults inside background tasks are logged and contained instead.

use std::time::Duration;

/// Errors reported by the runtime support layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation invoked before `Runtime::initialize`.
    #[error("runtime is not initialized")]
    NotInitialized,

    /// Operation invoked after shutdown has begun.
    #[error("runtime is shut down")]
    Stopped,

    /// Contract fault: a rate-limit check needs a non-empty identity.
    #[error("rate limit identity must not be empty")]
    InvalidIdentity,

    /// The durable store did not answer within the configured bound.
    #[error("durable store timed out after {0:?}")]
    StoreTimeout(Duration),

    /// Transient fault reported by the durable store collaborator.
    #[error("durable store error: {0}")]
    Store(String),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
