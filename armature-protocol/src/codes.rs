//! Activation and recovery code formats.
//!
//! Codes are 23 characters: four dash-separated groups of five from a
//! base32 alphabet (no `0`, `1`, `8`, `9`), chosen for verbal sharing
//! and OCR robustness.

use rand::Rng;

/// Length of a formatted activation code, dashes included.
pub const ACTIVATION_CODE_LENGTH: usize = 23;

const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const CODE_GROUPS: usize = 4;
const CODE_GROUP_LEN: usize = 5;

/// Generates a random activation code, e.g. `KJMPV-3DQTA-X2WNE-55ZLB`.
#[must_use]
pub fn generate_activation_code() -> String {
    let mut rng = rand::rngs::OsRng;
    let chars: Vec<u8> = (0..CODE_GROUPS * CODE_GROUP_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())])
        .collect();
    format_code(&chars)
}

/// Maps derived bytes onto the code format deterministically. Used for
/// recovery codes, which must be reproducible from a shared secret.
#[must_use]
pub(crate) fn code_from_bytes(bytes: &[u8]) -> String {
    debug_assert!(bytes.len() >= CODE_GROUPS * CODE_GROUP_LEN);
    let chars: Vec<u8> = bytes[..CODE_GROUPS * CODE_GROUP_LEN]
        .iter()
        .map(|b| CODE_ALPHABET[usize::from(*b) % CODE_ALPHABET.len()])
        .collect();
    format_code(&chars)
}

fn format_code(chars: &[u8]) -> String {
    chars
        .chunks(CODE_GROUP_LEN)
        .map(|group| std::str::from_utf8(group).expect("alphabet is ASCII"))
        .collect::<Vec<_>>()
        .join("-")
}

/// Validates the 23-character dash-separated code format.
#[must_use]
pub fn validate_activation_code(code: &str) -> bool {
    if code.len() != ACTIVATION_CODE_LENGTH {
        return false;
    }
    let groups: Vec<&str> = code.split('-').collect();
    groups.len() == CODE_GROUPS
        && groups.iter().all(|group| {
            group.len() == CODE_GROUP_LEN
                && group.bytes().all(|b| CODE_ALPHABET.contains(&b))
        })
}
