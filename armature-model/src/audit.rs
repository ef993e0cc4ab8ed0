//! Signature audit records.
//!
//! One record is appended for every verification attempt, valid or not.
//! Records snapshot the activation fields at the time of the attempt and
//! are never mutated.

use armature_types::{ActivationId, ApplicationId, ProtocolVersion, SignatureFactor, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ActivationStatus;

/// Outcome classification of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAuditNote {
    SignatureOk,
    SignatureDoesNotMatch,
    ActivationInvalidState,
    ActivationInvalidApplication,
}

/// Append-only audit entry for one signature verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureAuditRecord {
    pub activation_id: ActivationId,
    pub user_id: UserId,
    pub application_id: ApplicationId,
    pub activation_status: ActivationStatus,
    pub protocol_version: Option<ProtocolVersion>,
    pub factor: SignatureFactor,
    /// Numeric counter value at the time of the attempt.
    pub counter: u64,
    /// Hash-chain state at the time of the attempt, base64.
    pub ctr_data: Option<String>,
    /// SHA-256 digest of the signed data, hex.
    pub data_digest: String,
    pub signature: String,
    pub valid: bool,
    pub note: SignatureAuditNote,
    pub failed_attempts: u32,
    pub max_failed_attempts: u32,
    pub occurred_at: DateTime<Utc>,
}
