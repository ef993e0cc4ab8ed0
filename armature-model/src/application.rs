//! The application aggregate.
//!
//! An application is the server-side representation of one client
//! product: the `application_key` is the public identifier clients
//! present, the `application_secret` keys provisioning envelopes, and
//! the two master key pairs sign activation codes (Ed25519) and receive
//! provisioning envelopes (X25519).

use armature_types::ApplicationId;
use serde::{Deserialize, Serialize};

/// One registered client application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub name: String,
    /// Public identifier presented by clients on every call.
    pub application_key: String,
    /// Shared info mixed into provisioning envelope key derivation.
    pub application_secret: String,
    /// Ed25519 verifying key, raw bytes.
    pub master_signing_public_key: Vec<u8>,
    /// Ed25519 signing key, raw bytes. Absent for applications imported
    /// without key material; such applications cannot provision.
    pub master_signing_private_key: Option<Vec<u8>>,
    /// X25519 public key clients seal provisioning envelopes to.
    pub master_encryption_public_key: Vec<u8>,
    /// X25519 private key opening provisioning envelopes.
    pub master_encryption_private_key: Vec<u8>,
}

/// Per-application recovery configuration singleton.
///
/// Lazily created with everything disabled on first read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub application_id: ApplicationId,
    pub recovery_enabled: bool,
    pub postcard_enabled: bool,
    /// Allow more than one non-revoked postcard code per user.
    pub multiple_codes_allowed: bool,
    /// Local X25519 postcard private key.
    pub postcard_private_key: Option<Vec<u8>>,
    /// Local X25519 postcard public key (shared with the printing center).
    pub postcard_public_key: Option<Vec<u8>>,
    /// Printing-center X25519 public key.
    pub remote_public_key: Option<Vec<u8>>,
}

impl RecoveryConfig {
    /// The lazily-created default: all features off, no key material.
    #[must_use]
    pub fn disabled(application_id: ApplicationId) -> Self {
        Self {
            application_id,
            recovery_enabled: false,
            postcard_enabled: false,
            multiple_codes_allowed: false,
            postcard_private_key: None,
            postcard_public_key: None,
            remote_public_key: None,
        }
    }

    /// True when postcard recovery can actually derive codes.
    #[must_use]
    pub fn postcard_ready(&self) -> bool {
        self.recovery_enabled
            && self.postcard_enabled
            && self.postcard_private_key.is_some()
            && self.remote_public_key.is_some()
    }
}
