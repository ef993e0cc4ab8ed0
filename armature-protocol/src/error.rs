//! Error types for the protocol engine.
//!
//! Verification and approval *failures* are normal outcomes carried in
//! result structs, never errors. An `Err` from the engine always means
//! the call itself could not complete.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur in protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Entity is in the wrong status for the requested transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed input (envelope, code format, key bytes).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Failure from the crypto layer.
    #[error(transparent)]
    Crypto(#[from] armature_crypto::CryptoError),

    /// Failure from the storage layer.
    #[error(transparent)]
    Storage(#[from] armature_store::StorageError),

    /// Payload serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Collision-checked generation exhausted its retry budget.
    #[error("unable to generate {0}: retry budget exhausted")]
    ExhaustedRetries(&'static str),

    /// Deployment configuration prevents the operation.
    #[error("configuration error: {0}")]
    Configuration(String),
}
