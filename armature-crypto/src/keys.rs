//! Asymmetric key pairs and ECDH master secrets.
//!
//! Every activation holds one X25519 pair on the server side and learns
//! the device's public key during provisioning; the ECDH agreement of
//! the two is the master secret all per-factor and transport keys are
//! derived from. Applications additionally hold an Ed25519 pair for
//! signing activation codes.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Size of X25519 and Ed25519 public keys in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// An X25519 key pair.
pub struct EcKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EcKeyPair {
    /// Generates a fresh random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstructs a key pair from stored secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("X25519 secret must be 32 bytes".to_string()))?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    /// Returns the public key bytes.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Returns the secret key bytes for at-rest storage. The caller is
    /// responsible for wrapping them before persisting.
    #[must_use]
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Computes the ECDH shared secret with a peer public key.
    pub fn ecdh(&self, peer_public: &[u8]) -> CryptoResult<SharedSecret> {
        let peer: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("X25519 public key must be 32 bytes".to_string()))?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        Ok(SharedSecret(shared.to_bytes()))
    }
}

impl std::fmt::Debug for EcKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcKeyPair")
            .field("public", &self.public_bytes())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// An ECDH agreement result, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub(crate) [u8; 32]);

impl SharedSecret {
    /// Returns the raw shared secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// An Ed25519 signing key pair.
pub struct SigningKeyPair {
    signing: SigningKey,
}

impl SigningKeyPair {
    /// Generates a fresh random signing pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstructs a signing pair from stored secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Ed25519 secret must be 32 bytes".to_string()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&bytes),
        })
    }

    /// Returns the verifying key bytes.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// Returns the secret key bytes for at-rest storage.
    #[must_use]
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Signs arbitrary data, returning the 64-byte signature.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing.sign(data).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &self.public_bytes())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Verifies an Ed25519 signature against raw public key bytes.
pub fn verify_signature(public_key: &[u8], data: &[u8], signature: &[u8]) -> CryptoResult<bool> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("Ed25519 public key must be 32 bytes".to_string()))?;
    let verifying = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))?;
    let signature = Signature::from_slice(signature)
        .map_err(|_| CryptoError::Signature("invalid signature length".to_string()))?;
    Ok(verifying.verify(data, &signature).is_ok())
}
