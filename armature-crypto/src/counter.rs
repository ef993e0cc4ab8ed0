//! Replay-protection counter material and device-key fingerprints.
//!
//! Version 2 embeds a numeric counter into a fixed 16-byte block;
//! version 3 advances a one-way SHA-256 hash chain from a random seed.
//! Either form feeds the signature HMAC as counter material. The
//! fingerprint formulas are version-dependent: version 3 binds the
//! server key and activation id in addition to the device key.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Size of counter material and hash-chain state in bytes.
pub const CTR_DATA_SIZE: usize = 16;

/// Generates a fresh random hash-chain seed.
#[must_use]
pub fn generate_ctr_seed() -> [u8; CTR_DATA_SIZE] {
    let mut seed = [0u8; CTR_DATA_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    seed
}

/// Advances the hash chain by one step. One-way: there is no inverse.
#[must_use]
pub fn next_ctr_data(ctr_data: &[u8; CTR_DATA_SIZE]) -> [u8; CTR_DATA_SIZE] {
    let digest = Sha256::digest(ctr_data);
    let mut next = [0u8; CTR_DATA_SIZE];
    next.copy_from_slice(&digest[..CTR_DATA_SIZE]);
    next
}

/// Version-2 counter material: the numeric counter as 8 big-endian
/// bytes in the tail of a zeroed 16-byte block.
#[must_use]
pub fn counter_material_v2(counter: u64) -> [u8; CTR_DATA_SIZE] {
    let mut material = [0u8; CTR_DATA_SIZE];
    material[8..].copy_from_slice(&counter.to_be_bytes());
    material
}

/// Version-2 device key fingerprint: decimalized digest of the device
/// public key alone.
#[must_use]
pub fn fingerprint_v2(device_public_key: &[u8]) -> String {
    decimalize(&Sha256::digest(device_public_key))
}

/// Version-3 device key fingerprint: binds device key, activation id
/// and server key, so a fingerprint cannot be replayed across
/// activations.
#[must_use]
pub fn fingerprint_v3(
    device_public_key: &[u8],
    activation_id: &str,
    server_public_key: &[u8],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_public_key);
    hasher.update(activation_id.as_bytes());
    hasher.update(server_public_key);
    decimalize(&hasher.finalize())
}

fn decimalize(digest: &[u8]) -> String {
    let tail: [u8; 4] = digest[digest.len() - 4..]
        .try_into()
        .expect("digest is at least 4 bytes");
    let value = u64::from(u32::from_be_bytes(tail) & 0x7FFF_FFFF) % 100_000_000;
    format!("{value:08}")
}
