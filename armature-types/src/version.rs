//! Signature protocol version tag.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the signature protocol an activation speaks.
///
/// Version 2 uses a plain numeric replay counter; version 3 replaces it
/// with a one-way hash-chain counter. The version is fixed once the
/// first signature has been verified, except for the explicit 2→3
/// upgrade window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Numeric replay counter.
    V2,
    /// Hash-chain replay counter.
    V3,
}

impl ProtocolVersion {
    /// Numeric form as sent on the wire.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        match self {
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

impl TryFrom<u32> for ProtocolVersion {
    type Error = crate::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(crate::Error::UnsupportedVersion(other)),
        }
    }
}
