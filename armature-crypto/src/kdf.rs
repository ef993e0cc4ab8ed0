//! Key derivation and password hashing.
//!
//! Subkeys (factor keys, transport keys, envelope keys, vault keys) are
//! derived from ECDH master secrets with HKDF-SHA256 under stable string
//! labels. Recovery PUKs are hashed with Argon2id before storage.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, Params, Version};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Size of symmetric keys in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// A derived symmetric key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a derived key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derives a subkey from a secret under a stable string label.
///
/// Labels are part of the protocol: changing one invalidates every key
/// derived under it.
#[must_use]
pub fn derive_subkey(secret: &[u8], label: &str) -> DerivedKey {
    derive_subkey_with_context(secret, label, &[])
}

/// Derives a subkey bound to an additional context (e.g. an activation
/// id or an application secret).
#[must_use]
pub fn derive_subkey_with_context(secret: &[u8], label: &str, context: &[u8]) -> DerivedKey {
    let hk = Hkdf::<Sha256>::new(None, secret);
    let mut info = Vec::with_capacity(label.len() + 1 + context.len());
    info.extend_from_slice(label.as_bytes());
    info.push(0x00);
    info.extend_from_slice(context);

    let mut okm = [0u8; KEY_SIZE];
    // 32-byte output from HKDF-SHA256 cannot exceed the expand limit.
    hk.expand(&info, &mut okm)
        .expect("HKDF output length within bounds");
    DerivedKey::from_bytes(okm)
}

/// Argon2id parameters for PUK hashing.
#[derive(Clone, Debug)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP recommendations for Argon2id (2023)
        Self {
            memory_cost: 19 * 1024, // 19 MiB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Fast parameters for tests and interactive tooling. Not secure.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            memory_cost: 1024, // 1 MiB
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn argon2(&self) -> CryptoResult<Argon2<'static>> {
        let params = Params::new(self.memory_cost, self.time_cost, self.parallelism, None)
            .map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
        Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hashes a secret value with Argon2id, returning a PHC string that
/// embeds salt and parameters.
pub fn hash_password(password: &[u8], params: &KdfParams) -> CryptoResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = params
        .argon2()?
        .hash_password(password, &salt)
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verifies a secret value against a stored PHC string.
///
/// Returns `Ok(false)` on mismatch; `Err` only when the stored hash is
/// malformed.
pub fn verify_password(password: &[u8], phc: &str) -> CryptoResult<bool> {
    let parsed =
        PasswordHash::new(phc).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default().verify_password(password, &parsed).is_ok())
}
