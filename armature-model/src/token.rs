//! Simple authentication token.

use armature_types::{ActivationId, SignatureFactor, TokenId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A secret-based digest token derived from an active activation.
///
/// Immutable once created; removed by explicit deletion only. The token
/// carries the factor the client authenticated with when requesting it,
/// so resource servers can gate endpoints on issuance strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    /// Random secret used to compute validation digests.
    pub secret: Vec<u8>,
    pub activation_id: ActivationId,
    pub factor: SignatureFactor,
    pub created_at: DateTime<Utc>,
}
