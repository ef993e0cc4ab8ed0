//! Recovery code subsystem.
//!
//! Codes and their PUKs are derived deterministically from an X25519
//! agreement between the application's postcard key and the printing
//! center's key, so the printing center can regenerate the PUK values
//! from the returned nonce without them ever crossing the wire or
//! touching storage. The server keeps only Argon2id hashes.

use armature_crypto::{decrypt, derive_subkey_with_context, hash_password, EcKeyPair, EncryptedData};
use armature_model::{
    ActivationStatus, PukStatus, RecoveryCode, RecoveryCodeStatus, RecoveryConfig, RecoveryPuk,
};
use armature_store::{
    ActivationStore, ApplicationStore, RecoveryCodeQuery, RecoveryCodeStore,
};
use armature_types::{ActivationId, ApplicationId, RecoveryCodeId, UserId};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::codes::{code_from_bytes, validate_activation_code};
use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{CallbackMessage, CallbackPayload, CallbackSender};
use crate::keys::KeyProvider;

const CODE_LABEL: &str = "recovery-code";
const PUK_LABEL: &str = "recovery-puk";
const PUK_DIGITS: u64 = 10_000_000_000; // 10 decimal digits

/// Request to derive and persist a recovery code.
#[derive(Debug, Clone)]
pub struct CreateRecoveryCodeRequest {
    pub application_id: ApplicationId,
    pub user_id: UserId,
    /// Present when the code is issued for one specific activation.
    pub activation_id: Option<ActivationId>,
    /// Overrides the configured PUK count.
    pub puk_count: Option<u32>,
}

/// Result of recovery code creation. The only place the full code value
/// ever appears.
#[derive(Debug, Clone)]
pub struct CreateRecoveryCodeResponse {
    pub recovery_code_id: RecoveryCodeId,
    pub recovery_code: String,
    /// Derivation nonce, base64, for the printing center to regenerate
    /// the PUK values.
    pub puk_derivation_nonce: String,
    pub puk_indices: Vec<u32>,
}

/// Plaintext the device seals (under the transport key) into a
/// recovery confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRecoveryPayload {
    pub recovery_code: String,
}

/// Result of a confirmation.
#[derive(Debug, Clone)]
pub struct ConfirmRecoveryCodeResponse {
    pub recovery_code_id: RecoveryCodeId,
    /// True when the code was already ACTIVE and nothing changed.
    pub already_confirmed: bool,
}

/// Outward-facing view of a recovery code: value masked, PUK statuses
/// in index order.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryCodeSummary {
    pub recovery_code_id: RecoveryCodeId,
    pub application_id: ApplicationId,
    pub user_id: UserId,
    pub activation_id: Option<ActivationId>,
    pub masked_code: String,
    pub status: RecoveryCodeStatus,
    pub puk_statuses: Vec<PukStatus>,
}

/// Derives the recovery code and PUK values for one (shared secret,
/// nonce) pair. Shared by the server and the printing-center side; both
/// must produce identical values.
#[must_use]
pub fn derive_recovery_credentials(
    shared_secret: &[u8],
    nonce: &[u8],
    puk_count: u32,
) -> (String, Vec<String>) {
    let code_key = derive_subkey_with_context(shared_secret, CODE_LABEL, nonce);
    let code = code_from_bytes(code_key.as_bytes());

    let puks = (1..=puk_count)
        .map(|index| {
            let mut context = Vec::with_capacity(nonce.len() + 4);
            context.extend_from_slice(nonce);
            context.extend_from_slice(&index.to_be_bytes());
            let puk_key = derive_subkey_with_context(shared_secret, PUK_LABEL, &context);
            let head: [u8; 8] = puk_key.as_bytes()[..8]
                .try_into()
                .expect("derived key is 32 bytes");
            format!("{:010}", u64::from_be_bytes(head) % PUK_DIGITS)
        })
        .collect();

    (code, puks)
}

/// Manages recovery codes and PUKs.
#[derive(Clone)]
pub struct RecoveryManager {
    config: ProtocolConfig,
    recovery_codes: Arc<dyn RecoveryCodeStore>,
    activations: Arc<dyn ActivationStore>,
    applications: Arc<dyn ApplicationStore>,
    keys: Arc<KeyProvider>,
    callbacks: CallbackSender,
}

impl RecoveryManager {
    pub(crate) fn new(
        config: ProtocolConfig,
        recovery_codes: Arc<dyn RecoveryCodeStore>,
        activations: Arc<dyn ActivationStore>,
        applications: Arc<dyn ApplicationStore>,
        keys: Arc<KeyProvider>,
        callbacks: CallbackSender,
    ) -> Self {
        Self {
            config,
            recovery_codes,
            activations,
            applications,
            keys,
            callbacks,
        }
    }

    /// The per-application recovery configuration, lazily created with
    /// all features disabled on first read.
    pub async fn recovery_config(
        &self,
        application_id: &ApplicationId,
    ) -> ProtocolResult<RecoveryConfig> {
        if let Some(config) = self.applications.get_recovery_config(application_id).await? {
            return Ok(config);
        }
        let config = RecoveryConfig::disabled(*application_id);
        self.applications.put_recovery_config(config.clone()).await?;
        Ok(config)
    }

    /// Replaces the per-application recovery configuration.
    pub async fn update_recovery_config(&self, config: RecoveryConfig) -> ProtocolResult<()> {
        if self.applications.get_application(&config.application_id).await?.is_none() {
            return Err(ProtocolError::NotFound("application".to_string()));
        }
        Ok(self.applications.put_recovery_config(config).await?)
    }

    /// Derives and persists a recovery code with its PUKs.
    ///
    /// Retries only on recovery-code collision; PUK values within one
    /// code are not guaranteed unique (rows are keyed by index).
    pub async fn create_recovery_code(
        &self,
        request: CreateRecoveryCodeRequest,
    ) -> ProtocolResult<CreateRecoveryCodeResponse> {
        if self.applications.get_application(&request.application_id).await?.is_none() {
            return Err(ProtocolError::NotFound("application".to_string()));
        }
        let recovery_config = self.recovery_config(&request.application_id).await?;
        if !recovery_config.postcard_ready() {
            return Err(ProtocolError::Configuration(
                "postcard recovery is not enabled for this application".to_string(),
            ));
        }

        if !recovery_config.multiple_codes_allowed {
            let existing = self
                .recovery_codes
                .query_recovery_codes(&RecoveryCodeQuery {
                    application_id: Some(request.application_id),
                    user_id: Some(request.user_id.clone()),
                    ..Default::default()
                })
                .await?;
            if existing.iter().any(RecoveryCode::counts_against_limit) {
                return Err(ProtocolError::InvalidState(
                    "user already has a recovery code".to_string(),
                ));
            }
        }

        let (Some(postcard_private), Some(remote_public)) = (
            recovery_config.postcard_private_key.as_deref(),
            recovery_config.remote_public_key.as_deref(),
        ) else {
            return Err(ProtocolError::Configuration(
                "postcard recovery keys are not configured".to_string(),
            ));
        };
        let shared = EcKeyPair::from_secret_bytes(postcard_private)?.ecdh(remote_public)?;

        let puk_count = request.puk_count.unwrap_or(self.config.recovery_puk_count);
        let mut derived = None;
        for _ in 0..self.config.id_generation_attempts {
            let mut nonce = [0u8; 16];
            rand::rngs::OsRng.fill_bytes(&mut nonce);
            let (code, puks) = derive_recovery_credentials(shared.as_bytes(), &nonce, puk_count);
            if !self
                .recovery_codes
                .recovery_code_exists(&request.application_id, &code)
                .await?
            {
                derived = Some((nonce, code, puks));
                break;
            }
        }
        let (nonce, code, puk_values) =
            derived.ok_or(ProtocolError::ExhaustedRetries("recovery code"))?;

        let puks = puk_values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                Ok(RecoveryPuk {
                    index: i as u32 + 1,
                    puk_hash: hash_password(value.as_bytes(), &self.config.puk_kdf)?,
                    status: PukStatus::Valid,
                    used_at: None,
                })
            })
            .collect::<ProtocolResult<Vec<_>>>()?;

        let now = Utc::now();
        let record = RecoveryCode {
            id: RecoveryCodeId::new(),
            application_id: request.application_id,
            user_id: request.user_id,
            activation_id: request.activation_id,
            code: code.clone(),
            status: RecoveryCodeStatus::Created,
            failed_attempts: 0,
            max_failed_attempts: self.config.recovery_max_failed_attempts,
            puks,
            created_at: now,
            status_changed_at: now,
        };

        let puk_indices = record.puks.iter().map(|p| p.index).collect();
        let response = CreateRecoveryCodeResponse {
            recovery_code_id: record.id,
            recovery_code: code,
            puk_derivation_nonce: BASE64.encode(nonce),
            puk_indices,
        };

        self.recovery_codes.create_recovery_code(record.clone()).await?;
        self.notify_status(&record);
        info!(recovery_code_id = %record.id, "recovery code created");
        Ok(response)
    }

    /// Confirms a recovery code presented by an active device.
    ///
    /// The payload is sealed under the activation's transport key.
    /// Confirming an already-ACTIVE code is an idempotent no-op
    /// reported through `already_confirmed`.
    pub async fn confirm_recovery_code(
        &self,
        activation_id: &ActivationId,
        encrypted_payload: &EncryptedData,
    ) -> ProtocolResult<ConfirmRecoveryCodeResponse> {
        let activation = self
            .activations
            .get_activation(activation_id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("activation".to_string()))?;
        if activation.status != ActivationStatus::Active {
            return Err(ProtocolError::InvalidState(format!(
                "activation is {:?}",
                activation.status
            )));
        }

        let recovery_config = self.recovery_config(&activation.application_id).await?;
        if !recovery_config.recovery_enabled {
            return Err(ProtocolError::Configuration(
                "recovery is not enabled for this application".to_string(),
            ));
        }

        let transport_key = self.keys.transport_key(&activation)?;
        let plaintext = decrypt(&transport_key, encrypted_payload)?;
        let payload: ConfirmRecoveryPayload = serde_json::from_slice(&plaintext)
            .map_err(|e| ProtocolError::InvalidInput(format!("malformed payload: {e}")))?;

        if !validate_activation_code(&payload.recovery_code) {
            return Err(ProtocolError::InvalidInput(
                "malformed recovery code".to_string(),
            ));
        }

        // Deliberately the same error for "no such code" and "not your
        // code" so the response does not confirm existence.
        let found = self
            .recovery_codes
            .get_recovery_code_by_value(&activation.application_id, &payload.recovery_code)
            .await?
            .filter(|code| code.user_id == activation.user_id)
            .ok_or_else(|| ProtocolError::NotFound("recovery code".to_string()))?;

        let lease = self.recovery_codes.lock_recovery_code(&found.id);
        let _guard = lease.lock().await;
        let mut code = self
            .recovery_codes
            .get_recovery_code(&found.id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("recovery code".to_string()))?;

        match code.status {
            RecoveryCodeStatus::Created => {
                code.status = RecoveryCodeStatus::Active;
                code.status_changed_at = Utc::now();
                self.recovery_codes.update_recovery_code(&code).await?;
                self.notify_status(&code);
                debug!(recovery_code_id = %code.id, "recovery code confirmed");
                Ok(ConfirmRecoveryCodeResponse {
                    recovery_code_id: code.id,
                    already_confirmed: false,
                })
            }
            RecoveryCodeStatus::Active => Ok(ConfirmRecoveryCodeResponse {
                recovery_code_id: code.id,
                already_confirmed: true,
            }),
            status => Err(ProtocolError::InvalidState(format!(
                "recovery code is {status:?}"
            ))),
        }
    }

    /// Masked view of recovery codes matching the filter.
    pub async fn lookup_recovery_codes(
        &self,
        query: &RecoveryCodeQuery,
    ) -> ProtocolResult<Vec<RecoveryCodeSummary>> {
        let codes = self.recovery_codes.query_recovery_codes(query).await?;
        Ok(codes
            .into_iter()
            .map(|code| RecoveryCodeSummary {
                recovery_code_id: code.id,
                application_id: code.application_id,
                user_id: code.user_id.clone(),
                activation_id: code.activation_id,
                masked_code: code.masked_code(),
                status: code.status,
                puk_statuses: code.puks.iter().map(|p| p.status).collect(),
            })
            .collect())
    }

    /// Revokes the given codes. Idempotent per code: already-revoked
    /// codes are skipped. Revocation cascades VALID → INVALID over the
    /// code's PUKs in the same write. Returns how many codes changed.
    pub async fn revoke_recovery_codes(
        &self,
        ids: &[RecoveryCodeId],
    ) -> ProtocolResult<usize> {
        let mut revoked = 0;
        for id in ids {
            let lease = self.recovery_codes.lock_recovery_code(id);
            let _guard = lease.lock().await;

            let Some(mut code) = self.recovery_codes.get_recovery_code(id).await? else {
                debug!(recovery_code_id = %id, "revocation skipped unknown code");
                continue;
            };
            if code.status == RecoveryCodeStatus::Revoked {
                continue;
            }

            code.status = RecoveryCodeStatus::Revoked;
            code.status_changed_at = Utc::now();
            code.invalidate_puks();
            self.recovery_codes.update_recovery_code(&code).await?;
            self.notify_status(&code);
            revoked += 1;
        }
        if revoked > 0 {
            info!(revoked, "recovery codes revoked");
        }
        Ok(revoked)
    }

    fn notify_status(&self, code: &RecoveryCode) {
        self.callbacks.notify(CallbackMessage {
            application_id: code.application_id,
            payload: CallbackPayload::RecoveryCodeStatusChanged {
                recovery_code_id: code.id,
                user_id: code.user_id.clone(),
                status: code.status,
            },
        });
    }
}
