//! The operation aggregate — an out-of-band action awaiting approval.
//!
//! Operations are created from named templates. The `data` string is
//! rendered exactly once at creation; approval later requires a
//! byte-exact match against it, so a template or parameter mismatch is
//! indistinguishable from tampering.

use armature_types::{ApplicationId, OperationId, SignatureFactor, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of an approval operation. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Approved,
    Rejected,
    Failed,
    Expired,
    Canceled,
}

impl OperationStatus {
    /// True for any state an operation cannot leave.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Admin-managed template an operation is instantiated from.
///
/// Read-only at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationTemplate {
    /// Unique template name used for lookup at creation.
    pub name: String,
    pub operation_type: String,
    /// Data template with `{placeholder}` markers.
    pub data_template: String,
    pub allowed_factors: Vec<SignatureFactor>,
    pub max_failure_count: u32,
    /// Offset added to the creation time to compute `expires_at`.
    pub expiration_secs: i64,
}

impl OperationTemplate {
    /// Renders the data string by substituting `{name}` placeholders
    /// with caller-supplied parameters. Unknown placeholders are left
    /// verbatim so a missing parameter surfaces in the rendered data
    /// rather than silently vanishing.
    #[must_use]
    pub fn render_data(&self, parameters: &HashMap<String, String>) -> String {
        let mut data = self.data_template.clone();
        for (key, value) in parameters {
            data = data.replace(&format!("{{{key}}}"), value);
        }
        data
    }
}

/// One pending (or finalized) approval operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub user_id: UserId,
    pub application_ids: Vec<ApplicationId>,
    /// Caller-side correlation id.
    pub external_id: Option<String>,
    pub operation_type: String,
    /// Rendered once at creation; never changes.
    pub data: String,
    pub parameters: HashMap<String, String>,
    pub status: OperationStatus,
    pub allowed_factors: Vec<SignatureFactor>,
    pub failure_count: u32,
    pub max_failure_count: u32,
    /// Free-form risk annotation supplied by the caller.
    pub risk_flags: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set exactly once, at the transition out of `Pending`.
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// True when a still-pending operation has outlived its window.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending && now > self.expires_at
    }

    /// True when the claimed factor is allowed for this operation.
    #[must_use]
    pub fn allows_factor(&self, factor: SignatureFactor) -> bool {
        self.allowed_factors.contains(&factor)
    }

    /// Moves the operation out of `Pending` into a terminal state.
    pub fn finalize(&mut self, status: OperationStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.finalized_at = Some(now);
    }
}
