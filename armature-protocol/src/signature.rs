//! Signature verification engine.
//!
//! Verifies every authenticated request against an activation: derives
//! the factor keys from the ECDH master secret, tries a window of
//! consecutive counter positions, commits the counter advance on a
//! match and charges the failure budget on a miss. Each attempt, valid
//! or not, appends one audit record.
//!
//! Verification *failure* is a normal outcome reported in
//! [`SignatureVerification`]; an `Err` means the call itself could not
//! run.

use armature_crypto::{
    compute_signature, derive_factor_keys, encrypt, signatures_match, EncryptedData,
};
use armature_model::{
    Activation, ActivationStatus, SignatureAuditNote, SignatureAuditRecord,
    BLOCKED_REASON_MAX_FAILED_ATTEMPTS,
};
use armature_store::{ActivationStore, ApplicationStore, AuditSink};
use armature_types::{ActivationId, ProtocolVersion, SignatureFactor};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{CallbackMessage, CallbackPayload, CallbackSender};
use crate::keys::KeyProvider;
use crate::scheme::{resolve_scheme, CounterScheme};

/// One verification request.
#[derive(Debug, Clone)]
pub struct SignatureRequest {
    pub activation_id: ActivationId,
    pub application_key: String,
    pub factor: SignatureFactor,
    pub signature: String,
    /// Raw signed data, already normalized by the transport layer.
    pub data: Vec<u8>,
    /// Version override, accepted only inside the 2→3 upgrade window.
    pub forced_version: Option<ProtocolVersion>,
}

/// Structured verification outcome.
#[derive(Debug, Clone)]
pub struct SignatureVerification {
    pub valid: bool,
    /// Status as reported to the caller. Synthetic REMOVED when the
    /// activation is unknown or the application did not match.
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    /// `max − failed`, computed at response time.
    pub remaining_attempts: u32,
}

impl SignatureVerification {
    fn concealed() -> Self {
        Self {
            valid: false,
            activation_status: ActivationStatus::Removed,
            blocked_reason: None,
            remaining_attempts: 0,
        }
    }

    fn invalid_for(activation: &Activation) -> Self {
        Self {
            valid: false,
            activation_status: activation.status,
            blocked_reason: activation.blocked_reason.clone(),
            remaining_attempts: activation.remaining_attempts(),
        }
    }
}

/// Result of a vault unlock: a verification outcome plus, when valid,
/// the vault key sealed under the transport key.
#[derive(Debug, Clone)]
pub struct VaultUnlockResult {
    pub verification: SignatureVerification,
    pub encrypted_vault_key: Option<EncryptedData>,
}

/// The verification engine.
#[derive(Clone)]
pub struct SignatureEngine {
    config: ProtocolConfig,
    activations: Arc<dyn ActivationStore>,
    applications: Arc<dyn ApplicationStore>,
    audit: Arc<dyn AuditSink>,
    keys: Arc<KeyProvider>,
    callbacks: CallbackSender,
}

impl SignatureEngine {
    pub(crate) fn new(
        config: ProtocolConfig,
        activations: Arc<dyn ActivationStore>,
        applications: Arc<dyn ApplicationStore>,
        audit: Arc<dyn AuditSink>,
        keys: Arc<KeyProvider>,
        callbacks: CallbackSender,
    ) -> Self {
        Self {
            config,
            activations,
            applications,
            audit,
            keys,
            callbacks,
        }
    }

    /// Online verification.
    pub async fn verify(
        &self,
        request: SignatureRequest,
    ) -> ProtocolResult<SignatureVerification> {
        let lease = self.activations.lock_activation(&request.activation_id);
        let _guard = lease.lock().await;

        let Some(mut activation) = self.activations.get_activation(&request.activation_id).await? else {
            return Ok(SignatureVerification::concealed());
        };

        let now = Utc::now();
        if activation.provisioning_expired(now) {
            self.transition_removed(&mut activation, now).await?;
        }

        let application = self.applications.get_application_by_key(&request.application_key).await?;
        let application_valid = application
            .as_ref()
            .is_some_and(|a| a.id == activation.application_id);
        if !application_valid {
            // The failure budget is still charged for non-possession
            // factors, and the real status is never revealed.
            if activation.status == ActivationStatus::Active
                && !request.factor.is_possession_only()
            {
                self.register_failure(&mut activation, now).await?;
            }
            self.append_audit(
                &activation,
                request.factor,
                &request.data,
                &request.signature,
                false,
                SignatureAuditNote::ActivationInvalidApplication,
                now,
            )
            .await?;
            return Ok(SignatureVerification::concealed());
        }

        if activation.status != ActivationStatus::Active {
            self.append_audit(
                &activation,
                request.factor,
                &request.data,
                &request.signature,
                false,
                SignatureAuditNote::ActivationInvalidState,
                now,
            )
            .await?;
            return Ok(SignatureVerification::invalid_for(&activation));
        }

        self.verify_against_active(
            &mut activation,
            &[request.factor],
            &request.signature,
            &request.data,
            request.forced_version,
            now,
        )
        .await
    }

    /// Offline verification: the signer's factor is ambiguous (PIN or
    /// biometry behind the same prompt), so a set of acceptable factors
    /// is tried at every counter position. The caller normalizes data
    /// with the fixed offline application-secret marker; no application
    /// check applies here.
    pub async fn verify_offline(
        &self,
        activation_id: &ActivationId,
        acceptable_factors: &[SignatureFactor],
        signature: &str,
        data: &[u8],
        forced_version: Option<ProtocolVersion>,
    ) -> ProtocolResult<SignatureVerification> {
        if acceptable_factors.is_empty() {
            return Err(ProtocolError::InvalidInput(
                "no acceptable signature factors".to_string(),
            ));
        }

        let lease = self.activations.lock_activation(activation_id);
        let _guard = lease.lock().await;

        let Some(mut activation) = self.activations.get_activation(activation_id).await? else {
            return Ok(SignatureVerification::concealed());
        };

        let now = Utc::now();
        if activation.provisioning_expired(now) {
            self.transition_removed(&mut activation, now).await?;
        }
        if activation.status != ActivationStatus::Active {
            self.append_audit(
                &activation,
                acceptable_factors[0],
                data,
                signature,
                false,
                SignatureAuditNote::ActivationInvalidState,
                now,
            )
            .await?;
            return Ok(SignatureVerification::invalid_for(&activation));
        }

        self.verify_against_active(
            &mut activation,
            acceptable_factors,
            signature,
            data,
            forced_version,
            now,
        )
        .await
    }

    /// Full verification followed, when valid, by release of the vault
    /// subkey sealed under the transport key.
    pub async fn unlock_vault(
        &self,
        request: SignatureRequest,
    ) -> ProtocolResult<VaultUnlockResult> {
        let activation_id = request.activation_id;
        let verification = self.verify(request).await?;
        if !verification.valid {
            return Ok(VaultUnlockResult {
                verification,
                encrypted_vault_key: None,
            });
        }

        let activation = self
            .activations
            .get_activation(&activation_id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("activation".to_string()))?;
        let master = self.keys.master_secret(&activation)?;
        let vault_key = self.keys.vault_key(&master);
        let transport_key = self.keys.transport_key(&activation)?;
        let encrypted_vault_key = encrypt(&transport_key, vault_key.as_bytes())?;

        Ok(VaultUnlockResult {
            verification,
            encrypted_vault_key: Some(encrypted_vault_key),
        })
    }

    /// Lookahead loop over an ACTIVE activation. Expects the caller to
    /// hold the activation lease.
    async fn verify_against_active(
        &self,
        activation: &mut Activation,
        factors: &[SignatureFactor],
        signature: &str,
        data: &[u8],
        forced_version: Option<ProtocolVersion>,
        now: DateTime<Utc>,
    ) -> ProtocolResult<SignatureVerification> {
        let master = self.keys.master_secret(activation)?;
        let factor_keys: Vec<_> = factors
            .iter()
            .map(|factor| (*factor, derive_factor_keys(&master, *factor)))
            .collect();
        let resolved = resolve_scheme(activation, forced_version)?;

        let mut matched: Option<(u64, SignatureFactor)> = None;
        'lookahead: for step in 0..u64::from(self.config.signature_lookahead) {
            let material = resolved.scheme.advanced(step).material();
            for (factor, keys) in &factor_keys {
                let expected = compute_signature(keys, data, &material);
                if signatures_match(&expected, signature) {
                    matched = Some((step, *factor));
                    break 'lookahead;
                }
            }
        }

        match matched {
            Some((step, factor)) => {
                // Commit the position after the match; skipped-ahead
                // values are silently consumed.
                match resolved.scheme.advanced(step + 1) {
                    CounterScheme::V2 { counter } => activation.counter = counter,
                    CounterScheme::V3 { ctr_data } => {
                        activation.ctr_data = Some(ctr_data);
                        activation.counter += step + 1;
                    }
                }
                if !factor.is_possession_only() {
                    activation.failed_attempts = 0;
                }
                activation.last_used_at = Some(now);
                self.activations.update_activation(activation).await?;
                self.append_audit(
                    activation,
                    factor,
                    data,
                    signature,
                    true,
                    SignatureAuditNote::SignatureOk,
                    now,
                )
                .await?;
                debug!(
                    activation_id = %activation.id,
                    version = %resolved.version,
                    step,
                    "signature verified"
                );
                Ok(SignatureVerification {
                    valid: true,
                    activation_status: activation.status,
                    blocked_reason: None,
                    remaining_attempts: activation.remaining_attempts(),
                })
            }
            None => {
                let charges_budget = factors.iter().any(|f| !f.is_possession_only());
                if charges_budget {
                    self.register_failure(activation, now).await?;
                }
                self.append_audit(
                    activation,
                    factors[0],
                    data,
                    signature,
                    false,
                    SignatureAuditNote::SignatureDoesNotMatch,
                    now,
                )
                .await?;
                Ok(SignatureVerification::invalid_for(activation))
            }
        }
    }

    /// Charges one failed attempt and blocks the activation when the
    /// budget is exhausted. Persists the activation either way.
    async fn register_failure(
        &self,
        activation: &mut Activation,
        now: DateTime<Utc>,
    ) -> ProtocolResult<()> {
        activation.failed_attempts =
            (activation.failed_attempts + 1).min(activation.max_failed_attempts);

        if activation.failed_attempts >= activation.max_failed_attempts
            && activation.status == ActivationStatus::Active
        {
            activation.blocked_reason = Some(BLOCKED_REASON_MAX_FAILED_ATTEMPTS.to_string());
            activation.set_status(ActivationStatus::Blocked, now);
            self.activations.update_activation(activation).await?;
            self.activations
                .append_activation_history(activation.history_record(now))
                .await?;
            self.callbacks.notify(CallbackMessage {
                application_id: activation.application_id,
                payload: CallbackPayload::ActivationStatusChanged {
                    activation_id: activation.id,
                    user_id: activation.user_id.clone(),
                    status: activation.status,
                    reason: activation.blocked_reason.clone(),
                },
            });
            info!(activation_id = %activation.id, "activation blocked: failed-attempt budget exhausted");
        } else {
            self.activations.update_activation(activation).await?;
        }
        Ok(())
    }

    async fn transition_removed(
        &self,
        activation: &mut Activation,
        now: DateTime<Utc>,
    ) -> ProtocolResult<()> {
        activation.set_status(ActivationStatus::Removed, now);
        self.activations.update_activation(activation).await?;
        self.activations
            .append_activation_history(activation.history_record(now))
            .await?;
        self.callbacks.notify(CallbackMessage {
            application_id: activation.application_id,
            payload: CallbackPayload::ActivationStatusChanged {
                activation_id: activation.id,
                user_id: activation.user_id.clone(),
                status: activation.status,
                reason: None,
            },
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_audit(
        &self,
        activation: &Activation,
        factor: SignatureFactor,
        data: &[u8],
        signature: &str,
        valid: bool,
        note: SignatureAuditNote,
        now: DateTime<Utc>,
    ) -> ProtocolResult<()> {
        let record = SignatureAuditRecord {
            activation_id: activation.id,
            user_id: activation.user_id.clone(),
            application_id: activation.application_id,
            activation_status: activation.status,
            protocol_version: activation.protocol_version,
            factor,
            counter: activation.counter,
            ctr_data: activation.ctr_data.map(|d| BASE64.encode(d)),
            data_digest: hex::encode(Sha256::digest(data)),
            signature: signature.to_string(),
            valid,
            note,
            failed_attempts: activation.failed_attempts,
            max_failed_attempts: activation.max_failed_attempts,
            occurred_at: now,
        };
        self.audit.append(record).await?;
        Ok(())
    }
}
