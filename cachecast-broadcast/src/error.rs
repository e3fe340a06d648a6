//! Error types for broadcast operations.

use thiserror::Error;

/// Broadcast error type.
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// A subscriber with this id is already in the live set
    #[error("Subscriber already registered: {0}")]
    AlreadyRegistered(String),

    /// No subscriber with this id is in the live set
    #[error("Subscriber not registered: {0}")]
    NotRegistered(String),

    /// Event envelope could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for broadcast operations.
pub type BroadcastResult<T> = Result<T, BroadcastError>;
