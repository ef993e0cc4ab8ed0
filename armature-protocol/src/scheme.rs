//! Counter scheme selection and version resolution.
//!
//! The two protocol versions differ in how counter material is derived
//! and how the device-key fingerprint is computed. The scheme is
//! resolved once per verification call and then drives the lookahead.

use armature_crypto::{
    counter_material_v2, fingerprint_v2, fingerprint_v3, next_ctr_data, CTR_DATA_SIZE,
};
use armature_model::Activation;
use armature_types::{ActivationId, ProtocolVersion};

use crate::error::{ProtocolError, ProtocolResult};

/// The replay-counter state a verification trial starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CounterScheme {
    V2 { counter: u64 },
    V3 { ctr_data: [u8; CTR_DATA_SIZE] },
}

impl CounterScheme {
    /// Counter material fed into the signature HMAC at this position.
    pub fn material(&self) -> [u8; CTR_DATA_SIZE] {
        match self {
            Self::V2 { counter } => counter_material_v2(*counter),
            Self::V3 { ctr_data } => *ctr_data,
        }
    }

    /// The scheme `steps` positions ahead. Hash-chain advancement is
    /// one-way; there is no inverse operation.
    pub fn advanced(&self, steps: u64) -> Self {
        match self {
            Self::V2 { counter } => Self::V2 {
                counter: counter + steps,
            },
            Self::V3 { ctr_data } => {
                let mut data = *ctr_data;
                for _ in 0..steps {
                    data = next_ctr_data(&data);
                }
                Self::V3 { ctr_data: data }
            }
        }
    }
}

/// Resolved signature version plus its counter state.
pub(crate) struct ResolvedScheme {
    pub version: ProtocolVersion,
    pub scheme: CounterScheme,
}

/// Resolves the effective protocol version for one verification call.
///
/// The stored version wins, except that a forced version 3 is accepted
/// while the activation is still version 2 *and* a hash-chain seed
/// already exists — the upgrade window.
pub(crate) fn resolve_scheme(
    activation: &Activation,
    forced: Option<ProtocolVersion>,
) -> ProtocolResult<ResolvedScheme> {
    let stored = activation.protocol_version.ok_or_else(|| {
        ProtocolError::InvalidState("activation has no protocol version".to_string())
    })?;

    let effective = match forced {
        None => stored,
        Some(version) if version == stored => stored,
        Some(ProtocolVersion::V3)
            if stored == ProtocolVersion::V2 && activation.ctr_data.is_some() =>
        {
            ProtocolVersion::V3
        }
        Some(version) => {
            return Err(ProtocolError::InvalidInput(format!(
                "unsupported version override {version} for version {stored} activation"
            )));
        }
    };

    let scheme = match effective {
        ProtocolVersion::V2 => CounterScheme::V2 {
            counter: activation.counter,
        },
        ProtocolVersion::V3 => CounterScheme::V3 {
            ctr_data: activation.ctr_data.ok_or_else(|| {
                ProtocolError::InvalidState(
                    "version 3 activation has no hash-chain state".to_string(),
                )
            })?,
        },
    };

    Ok(ResolvedScheme {
        version: effective,
        scheme,
    })
}

/// Device-key fingerprint under the version-dependent formula.
pub(crate) fn compute_fingerprint(
    version: ProtocolVersion,
    device_public_key: &[u8],
    activation_id: &ActivationId,
    server_public_key: &[u8],
) -> String {
    match version {
        ProtocolVersion::V2 => fingerprint_v2(device_public_key),
        ProtocolVersion::V3 => fingerprint_v3(
            device_public_key,
            &activation_id.to_string(),
            server_public_key,
        ),
    }
}
