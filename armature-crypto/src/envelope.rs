//! ECIES-style sealed envelopes.
//!
//! Protects payloads exchanged before a long-term channel key exists
//! (provisioning requests, their responses). The sender generates an
//! ephemeral X25519 key, agrees with the recipient's static public key,
//! and derives two keys from the agreement and the caller's shared info:
//! one for the request body, one for the response that travels back on
//! the same exchange. The response therefore needs no second ephemeral
//! key — the opener returns the response key alongside the plaintext.

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::cipher::{self, EncryptedData};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_subkey_with_context, DerivedKey};

const REQUEST_LABEL: &str = "envelope-request";
const RESPONSE_LABEL: &str = "envelope-response";

/// A sealed envelope: ephemeral key, nonce and AEAD ciphertext.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Sender's ephemeral X25519 public key.
    pub ephemeral_public_key: [u8; 32],
    /// AEAD body (nonce + ciphertext + tag).
    pub body: EncryptedData,
}

/// Seals `plaintext` to the holder of `recipient_public`.
///
/// Returns the envelope and the response key the caller will need to
/// open the reply to this exchange.
pub fn seal(
    recipient_public: &[u8],
    shared_info: &[u8],
    plaintext: &[u8],
) -> CryptoResult<(SealedEnvelope, DerivedKey)> {
    let recipient: [u8; 32] = recipient_public
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("X25519 public key must be 32 bytes".to_string()))?;

    let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient));

    let request_key = envelope_key(shared.as_bytes(), REQUEST_LABEL, shared_info);
    let response_key = envelope_key(shared.as_bytes(), RESPONSE_LABEL, shared_info);

    let body = cipher::encrypt(&request_key, plaintext)?;

    Ok((
        SealedEnvelope {
            ephemeral_public_key: ephemeral_public.to_bytes(),
            body,
        },
        response_key,
    ))
}

/// Opens an envelope sealed to `recipient_secret`.
///
/// Returns the plaintext and the key for sealing the response to this
/// exchange.
pub fn open(
    recipient_secret: &[u8],
    shared_info: &[u8],
    envelope: &SealedEnvelope,
) -> CryptoResult<(Vec<u8>, DerivedKey)> {
    let secret: [u8; 32] = recipient_secret
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("X25519 secret must be 32 bytes".to_string()))?;

    let secret = StaticSecret::from(secret);
    let shared = secret.diffie_hellman(&PublicKey::from(envelope.ephemeral_public_key));

    let request_key = envelope_key(shared.as_bytes(), REQUEST_LABEL, shared_info);
    let response_key = envelope_key(shared.as_bytes(), RESPONSE_LABEL, shared_info);

    let plaintext = cipher::decrypt(&request_key, &envelope.body)?;
    Ok((plaintext, response_key))
}

fn envelope_key(shared: &[u8], label: &str, shared_info: &[u8]) -> DerivedKey {
    derive_subkey_with_context(shared, label, shared_info)
}
