//! Protocol engine configuration.

use armature_crypto::KdfParams;
use serde::Deserialize;

/// Tunables for the protocol engine.
///
/// Defaults match a production deployment; embedders override via their
/// own configuration loading.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Number of future counter positions tried during verification.
    pub signature_lookahead: u32,
    /// Retry budget for collision-checked id/code generation.
    pub id_generation_attempts: u32,
    /// Failed-attempt budget for new activations when the caller does
    /// not supply one.
    pub default_max_failed_attempts: u32,
    /// Provisioning validity window in seconds for new activations.
    pub activation_validity_secs: i64,
    /// Number of PUKs derived per recovery code.
    pub recovery_puk_count: u32,
    /// Failed-attempt budget for recovery codes.
    pub recovery_max_failed_attempts: u32,
    /// Interval of the pending-operation expiration sweep, seconds.
    pub operation_sweep_interval_secs: u64,
    /// Base64 master storage key wrapping server private keys at rest.
    /// When absent, server private keys are stored unwrapped.
    pub master_storage_key: Option<String>,
    /// Argon2id cost parameters for PUK hashing.
    #[serde(skip)]
    pub puk_kdf: KdfParams,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            signature_lookahead: 20,
            id_generation_attempts: 10,
            default_max_failed_attempts: 5,
            activation_validity_secs: 300,
            recovery_puk_count: 3,
            recovery_max_failed_attempts: 5,
            operation_sweep_interval_secs: 300,
            master_storage_key: None,
            puk_kdf: KdfParams::default(),
        }
    }
}
