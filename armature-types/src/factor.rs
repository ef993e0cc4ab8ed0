//! Signature factor taxonomy.
//!
//! A signature is always computed over one or more factor keys. The
//! possession key proves the device holds the activation key material;
//! knowledge adds a PIN/password-derived key; biometry adds a key gated
//! by the platform biometric store. Combined variants produce one MAC
//! component per ordered factor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single authentication factor contributing one key to a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorComponent {
    /// Device possession (activation key material).
    Possession,
    /// Knowledge (PIN or password derived).
    Knowledge,
    /// Biometry (platform biometric store).
    Biometry,
}

impl FactorComponent {
    /// Label used when deriving this factor's signing key from the
    /// activation master secret. Stable — changing it invalidates every
    /// issued activation.
    #[must_use]
    pub const fn derivation_label(&self) -> &'static str {
        match self {
            Self::Possession => "signature-possession",
            Self::Knowledge => "signature-knowledge",
            Self::Biometry => "signature-biometry",
        }
    }
}

/// The factor combination a signature claims.
///
/// Order within a combination is fixed (possession first), because the
/// signature format concatenates one MAC component per factor in this
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureFactor {
    Possession,
    Knowledge,
    Biometry,
    PossessionKnowledge,
    PossessionBiometry,
    PossessionKnowledgeBiometry,
}

impl SignatureFactor {
    /// The ordered factor components this combination signs with.
    #[must_use]
    pub const fn components(&self) -> &'static [FactorComponent] {
        use FactorComponent::{Biometry, Knowledge, Possession};
        match self {
            Self::Possession => &[Possession],
            Self::Knowledge => &[Knowledge],
            Self::Biometry => &[Biometry],
            Self::PossessionKnowledge => &[Possession, Knowledge],
            Self::PossessionBiometry => &[Possession, Biometry],
            Self::PossessionKnowledgeBiometry => &[Possession, Knowledge, Biometry],
        }
    }

    /// True for the plain possession factor, which never charges the
    /// failed-attempt budget.
    #[must_use]
    pub fn is_possession_only(&self) -> bool {
        matches!(self, Self::Possession)
    }

    /// Canonical string form (`possession_knowledge` etc.).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Possession => "possession",
            Self::Knowledge => "knowledge",
            Self::Biometry => "biometry",
            Self::PossessionKnowledge => "possession_knowledge",
            Self::PossessionBiometry => "possession_biometry",
            Self::PossessionKnowledgeBiometry => "possession_knowledge_biometry",
        }
    }
}

impl fmt::Display for SignatureFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureFactor {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "possession" => Ok(Self::Possession),
            "knowledge" => Ok(Self::Knowledge),
            "biometry" => Ok(Self::Biometry),
            "possession_knowledge" => Ok(Self::PossessionKnowledge),
            "possession_biometry" => Ok(Self::PossessionBiometry),
            "possession_knowledge_biometry" => Ok(Self::PossessionKnowledgeBiometry),
            other => Err(crate::Error::UnknownFactor(other.to_string())),
        }
    }
}
