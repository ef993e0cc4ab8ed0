//! Multi-factor request signature computation.
//!
//! A signature is one 8-digit decimal group per claimed factor, joined
//! with dashes. Each group is an HMAC-SHA256 over the counter material
//! concatenated with the signed data, keyed by that factor's derived
//! key, reduced to a decimal window. Both the client and the server run
//! this exact computation; verification is a constant-time comparison
//! of the two strings.

use armature_types::SignatureFactor;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::counter::CTR_DATA_SIZE;
use crate::kdf::{derive_subkey, DerivedKey};
use crate::keys::SharedSecret;

type HmacSha256 = Hmac<Sha256>;

/// Application secret stood in for offline (QR-code style) signatures,
/// where no per-application secret is available to the signer.
pub const OFFLINE_APPLICATION_SECRET: &str = "offline";

/// Decimal window of one signature component.
const COMPONENT_MODULO: u64 = 100_000_000;

/// Derives the ordered per-factor signing keys for a claimed factor
/// combination from the activation master secret.
#[must_use]
pub fn derive_factor_keys(master: &SharedSecret, factor: SignatureFactor) -> Vec<DerivedKey> {
    factor
        .components()
        .iter()
        .map(|component| derive_subkey(master.as_bytes(), component.derivation_label()))
        .collect()
}

/// Builds the canonical signed-data string from its request parts:
/// `method&base64(uri)&base64(nonce)&base64(body)&app_secret`.
#[must_use]
pub fn normalize_signature_data(
    method: &str,
    uri: &str,
    nonce: &[u8],
    body: &[u8],
    application_secret: &str,
) -> Vec<u8> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let mut data = Vec::new();
    data.extend_from_slice(method.as_bytes());
    data.push(b'&');
    data.extend_from_slice(STANDARD.encode(uri.as_bytes()).as_bytes());
    data.push(b'&');
    data.extend_from_slice(STANDARD.encode(nonce).as_bytes());
    data.push(b'&');
    data.extend_from_slice(STANDARD.encode(body).as_bytes());
    data.push(b'&');
    data.extend_from_slice(application_secret.as_bytes());
    data
}

/// Computes the signature string for the given factor keys, data and
/// counter material.
#[must_use]
pub fn compute_signature(
    keys: &[DerivedKey],
    data: &[u8],
    ctr_material: &[u8; CTR_DATA_SIZE],
) -> String {
    keys.iter()
        .map(|key| signature_component(key, data, ctr_material))
        .collect::<Vec<_>>()
        .join("-")
}

fn signature_component(key: &DerivedKey, data: &[u8], ctr_material: &[u8; CTR_DATA_SIZE]) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(ctr_material);
    mac.update(data);
    let digest = mac.finalize().into_bytes();

    // Decimalize the trailing four bytes, masking the sign bit.
    let tail: [u8; 4] = digest[digest.len() - 4..]
        .try_into()
        .expect("digest is at least 4 bytes");
    let value = u64::from(u32::from_be_bytes(tail) & 0x7FFF_FFFF) % COMPONENT_MODULO;
    format!("{value:08}")
}

/// Computes the digest proving possession of a token secret:
/// HMAC-SHA256 over `nonce&timestamp`, base64.
#[must_use]
pub fn compute_token_digest(secret: &[u8], nonce: &[u8], timestamp: i64) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(nonce);
    mac.update(b"&");
    mac.update(timestamp.to_string().as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of two signature strings.
#[must_use]
pub fn signatures_match(expected: &str, provided: &str) -> bool {
    // ct_eq requires equal lengths; the length itself is not secret.
    expected.len() == provided.len()
        && expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
