//! Recovery code and PUK aggregates.
//!
//! A recovery code is one out-of-band credential (typically printed on a
//! postcard) owning an ordered set of one-time PUKs. The code value is
//! masked in every outward-facing response except at creation; PUK
//! values are never persisted, only their password hashes.

use armature_types::{ActivationId, ApplicationId, RecoveryCodeId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a recovery code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryCodeStatus {
    /// Derived and persisted, not yet confirmed by the user.
    Created,
    /// Confirmed, usable for recovery.
    Active,
    /// Suspended after too many failed PUK attempts.
    Blocked,
    /// Terminal; revocation cascades to all still-valid PUKs.
    Revoked,
}

/// Status of a single PUK within a recovery code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PukStatus {
    Valid,
    Used,
    Invalid,
}

/// One one-time-use PUK row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPuk {
    /// 1-based derivation index within the owning code.
    pub index: u32,
    /// Argon2id hash of the PUK value (PHC string).
    pub puk_hash: String,
    pub status: PukStatus,
    pub used_at: Option<DateTime<Utc>>,
}

/// One recovery code and its PUKs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCode {
    pub id: RecoveryCodeId,
    pub application_id: ApplicationId,
    pub user_id: UserId,
    /// Set when the code was issued for a specific activation.
    pub activation_id: Option<ActivationId>,
    /// Full code value. Mask with [`RecoveryCode::masked_code`] before
    /// returning it anywhere after creation.
    pub code: String,
    pub status: RecoveryCodeStatus,
    pub failed_attempts: u32,
    pub max_failed_attempts: u32,
    pub puks: Vec<RecoveryPuk>,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
}

impl RecoveryCode {
    /// True while the code still counts against the one-code-per-user
    /// postcard limit.
    #[must_use]
    pub fn counts_against_limit(&self) -> bool {
        self.status != RecoveryCodeStatus::Revoked
    }

    /// The code with every group but the last replaced by asterisks,
    /// e.g. `*****-*****-*****-ABCDE`.
    #[must_use]
    pub fn masked_code(&self) -> String {
        match self.code.rsplit_once('-') {
            Some((head, tail)) => {
                let masked: String = head
                    .chars()
                    .map(|c| if c == '-' { '-' } else { '*' })
                    .collect();
                format!("{masked}-{tail}")
            }
            None => "*".repeat(self.code.len()),
        }
    }

    /// Marks every still-valid PUK invalid. Used by revocation.
    pub fn invalidate_puks(&mut self) {
        for puk in &mut self.puks {
            if puk.status == PukStatus::Valid {
                puk.status = PukStatus::Invalid;
            }
        }
    }
}
