//! Error types for the crypto layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key or tampered data).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Key bytes could not be parsed into a usable key.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Signing or signature parsing failed.
    #[error("signature error: {0}")]
    Signature(String),

    /// Password hashing or verification failed.
    #[error("password hash error: {0}")]
    PasswordHash(String),
}
