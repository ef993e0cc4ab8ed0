//! The activation aggregate — one device-account binding.
//!
//! Status transitions are monotonic per the lifecycle state machine:
//!
//! ```text
//! CREATED → OTP_USED → ACTIVE ⇄ BLOCKED
//!     \________\__________\_______\→ REMOVED
//! ```
//!
//! REMOVED is terminal; activations are never physically deleted. Every
//! status change is mirrored into the append-only history ledger.

use armature_types::{ActivationId, ApplicationId, ProtocolVersion, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Blocked reason recorded when no explicit reason was supplied.
pub const BLOCKED_REASON_NOT_SPECIFIED: &str = "NOT_SPECIFIED";

/// Blocked reason recorded when the failed-attempt budget is exhausted.
pub const BLOCKED_REASON_MAX_FAILED_ATTEMPTS: &str = "MAX_FAILED_ATTEMPTS";

/// Lifecycle status of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationStatus {
    /// Provisioning started on the server, key exchange not yet done.
    Created,
    /// Device key received, waiting for the commit step.
    OtpUsed,
    /// Fully provisioned, signatures are accepted.
    Active,
    /// Temporarily suspended; can return to Active.
    Blocked,
    /// Terminal logical deletion.
    Removed,
}

impl ActivationStatus {
    /// True while the activation is still being provisioned and its
    /// validity window applies.
    #[must_use]
    pub fn is_provisioning(&self) -> bool {
        matches!(self, Self::Created | Self::OtpUsed)
    }

    /// True for the terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

/// How the server private key is protected at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncryptionMode {
    /// Stored as raw bytes.
    Plain,
    /// Wrapped with a key derived from the deployment master storage key
    /// and the activation's user id + activation id.
    Encrypted,
}

/// One device-account binding and its replay-protection state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub id: ActivationId,
    pub user_id: UserId,
    pub application_id: ApplicationId,
    /// Short human-presentable code, meaningful only before commit.
    pub activation_code: String,
    /// Ed25519 signature of the activation code by the application
    /// master key, base64.
    pub activation_code_signature: String,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    /// Null until provisioning completes; fixed once a signature has
    /// been verified (modulo the explicit 2→3 upgrade).
    pub protocol_version: Option<ProtocolVersion>,
    /// Server X25519 private key, possibly wrapped per `server_key_encryption`.
    pub server_private_key: Vec<u8>,
    pub server_key_encryption: KeyEncryptionMode,
    /// Server X25519 public key, raw bytes.
    pub server_public_key: Vec<u8>,
    /// Device X25519 public key; set once during provisioning, immutable after.
    pub device_public_key: Option<Vec<u8>>,
    /// Numeric replay counter. Only ever advances.
    pub counter: u64,
    /// Hash-chain counter state (version 3). Only ever advances.
    pub ctr_data: Option<[u8; 16]>,
    pub failed_attempts: u32,
    pub max_failed_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// End of the provisioning validity window.
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub status_changed_at: DateTime<Utc>,
}

impl Activation {
    /// Remaining failed-attempt budget, always computed, never cached.
    #[must_use]
    pub fn remaining_attempts(&self) -> u32 {
        self.max_failed_attempts.saturating_sub(self.failed_attempts)
    }

    /// True when the provisioning window has lapsed without a commit.
    #[must_use]
    pub fn provisioning_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_provisioning() && now > self.expires_at
    }

    /// Applies a status transition, stamping the change timestamp and
    /// clearing the blocked reason when leaving Blocked.
    pub fn set_status(&mut self, status: ActivationStatus, now: DateTime<Utc>) {
        if self.status == ActivationStatus::Blocked && status != ActivationStatus::Blocked {
            self.blocked_reason = None;
        }
        self.status = status;
        self.status_changed_at = now;
    }

    /// Snapshot of this activation for the history ledger.
    #[must_use]
    pub fn history_record(&self, now: DateTime<Utc>) -> ActivationHistoryRecord {
        ActivationHistoryRecord {
            activation_id: self.id,
            status: self.status,
            reason: self.blocked_reason.clone(),
            protocol_version: self.protocol_version,
            occurred_at: now,
        }
    }
}

/// One row of the append-only activation history ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationHistoryRecord {
    pub activation_id: ActivationId,
    pub status: ActivationStatus,
    pub reason: Option<String>,
    pub protocol_version: Option<ProtocolVersion>,
    pub occurred_at: DateTime<Utc>,
}
