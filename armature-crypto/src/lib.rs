//! Key derivation and envelope layer for Armature.
//!
//! Wraps the low-level primitives into exactly the operations the
//! protocol core needs:
//! - X25519 key pairs and ECDH master secrets ([`keys`])
//! - HKDF-SHA256 subkey derivation and Argon2id password hashing ([`kdf`])
//! - ChaCha20-Poly1305 authenticated encryption ([`cipher`])
//! - ECIES-style sealed envelopes for pre-channel payloads ([`envelope`])
//! - Multi-factor HMAC signature computation ([`signature`])
//! - Replay counters: numeric material, hash chains, key fingerprints
//!   ([`counter`])
//!
//! Implementations own the key material; callers outside this crate
//! never touch raw shared secrets.

mod cipher;
mod counter;
mod envelope;
mod error;
mod kdf;
mod keys;
mod signature;

pub use cipher::{decrypt, encrypt, EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use counter::{
    counter_material_v2, fingerprint_v2, fingerprint_v3, generate_ctr_seed, next_ctr_data,
    CTR_DATA_SIZE,
};
pub use envelope::{open, seal, SealedEnvelope};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{
    derive_subkey, derive_subkey_with_context, hash_password, verify_password, DerivedKey,
    KdfParams, KEY_SIZE,
};
pub use keys::{EcKeyPair, SharedSecret, SigningKeyPair, verify_signature, PUBLIC_KEY_SIZE};
pub use signature::{
    compute_signature, compute_token_digest, derive_factor_keys, normalize_signature_data,
    signatures_match, OFFLINE_APPLICATION_SECRET,
};
