//! Core type definitions for Armature.
//!
//! This crate defines the fundamental, transport-agnostic types used
//! throughout the protocol core:
//! - Identifiers for activations, applications, operations, tokens and
//!   recovery codes (UUID v4), plus the free-form external user id
//! - The signature factor taxonomy (possession / knowledge / biometry
//!   and their combinations)
//! - The signature protocol version tag
//!
//! Aggregates, state machines and wire payloads belong in
//! `armature-model` and `armature-protocol`, not here.

mod factor;
mod ids;
mod version;

pub use factor::{FactorComponent, SignatureFactor};
pub use ids::{ActivationId, ApplicationId, OperationId, RecoveryCodeId, TokenId, UserId};
pub use version::ProtocolVersion;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown signature factor: {0}")]
    UnknownFactor(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),
}
