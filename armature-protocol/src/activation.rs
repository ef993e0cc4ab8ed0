//! Activation lifecycle manager.
//!
//! Owns the activation state machine: provisioning (init → prepare →
//! commit), status queries, block/unblock/remove, lazy expiration of
//! stale provisioning, and the 2→3 protocol upgrade. Every mutation
//! appends to the history ledger and emits a callback event after its
//! store write returns.

use armature_crypto::{
    encrypt, verify_signature, EcKeyPair, EncryptedData, SealedEnvelope, SigningKeyPair,
};
use armature_model::{Activation, ActivationStatus, Application, BLOCKED_REASON_NOT_SPECIFIED};
use armature_store::{ActivationStore, ApplicationStore};
use armature_types::{ActivationId, ApplicationId, ProtocolVersion, UserId};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::codes::{generate_activation_code, validate_activation_code, ACTIVATION_CODE_LENGTH};
use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{CallbackMessage, CallbackPayload, CallbackSender};
use crate::keys::KeyProvider;
use crate::scheme::compute_fingerprint;

/// Request to start provisioning a new activation.
#[derive(Debug, Clone)]
pub struct InitActivationRequest {
    pub application_id: ApplicationId,
    pub user_id: UserId,
    /// Overrides the configured default failed-attempt budget.
    pub max_failed_attempts: Option<u32>,
    /// Overrides the configured provisioning validity window.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of [`ActivationManager::init_activation`].
#[derive(Debug, Clone, Serialize)]
pub struct InitActivationResponse {
    pub activation_id: ActivationId,
    /// Human-presentable code, valid only until commit.
    pub activation_code: String,
    /// Ed25519 signature of the code by the application master key, base64.
    pub activation_code_signature: String,
}

/// Key-exchange request from the device.
#[derive(Debug, Clone)]
pub struct PrepareActivationRequest {
    pub application_key: String,
    pub activation_code: String,
    /// Sealed to the application's master encryption key with the
    /// application secret as shared info.
    pub envelope: SealedEnvelope,
}

/// Plaintext the device seals into the provisioning envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProvisioningPayload {
    /// Device X25519 public key, base64.
    pub device_public_key: String,
    pub device_name: Option<String>,
    pub platform: Option<String>,
}

/// Plaintext the server seals into the provisioning response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProvisioningPayload {
    /// Server X25519 public key, base64.
    pub server_public_key: String,
    /// Initial hash-chain counter state, base64.
    pub ctr_data: String,
}

/// Result of [`ActivationManager::prepare_activation`].
#[derive(Debug, Clone)]
pub struct PrepareActivationResponse {
    pub activation_id: ActivationId,
    pub user_id: UserId,
    /// [`ServerProvisioningPayload`] encrypted with the envelope
    /// response key.
    pub encrypted_payload: EncryptedData,
}

/// Status query response.
///
/// For unknown ids this is a synthetic REMOVED shape with zeroed
/// timestamps — existence is never confirmed or denied.
#[derive(Debug, Clone)]
pub struct ActivationStatusResponse {
    pub activation_id: ActivationId,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub protocol_version: Option<ProtocolVersion>,
    /// Encrypted (or, pre-key-exchange, random) status blob, base64.
    pub encrypted_status_blob: String,
    /// Signed activation code, present only while CREATED.
    pub activation_code_signature: Option<String>,
    /// Device-key fingerprint, present once a device key exists.
    pub device_fingerprint: Option<String>,
    pub remaining_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Contents of the encrypted status blob.
#[derive(Debug, Serialize, Deserialize)]
struct StatusBlob {
    status: ActivationStatus,
    protocol_version: Option<ProtocolVersion>,
    failed_attempts: u32,
    max_failed_attempts: u32,
}

/// Manages the activation lifecycle.
#[derive(Clone)]
pub struct ActivationManager {
    config: ProtocolConfig,
    activations: Arc<dyn ActivationStore>,
    applications: Arc<dyn ApplicationStore>,
    keys: Arc<KeyProvider>,
    callbacks: CallbackSender,
}

impl ActivationManager {
    pub(crate) fn new(
        config: ProtocolConfig,
        activations: Arc<dyn ActivationStore>,
        applications: Arc<dyn ApplicationStore>,
        keys: Arc<KeyProvider>,
        callbacks: CallbackSender,
    ) -> Self {
        Self {
            config,
            activations,
            applications,
            keys,
            callbacks,
        }
    }

    /// Starts provisioning: generates the server key pair, a collision-
    /// checked activation id and code, signs the code with the
    /// application master key and persists the CREATED activation.
    pub async fn init_activation(
        &self,
        request: InitActivationRequest,
    ) -> ProtocolResult<InitActivationResponse> {
        let application = self
            .applications
            .get_application(&request.application_id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("application".to_string()))?;

        let master_key = application.master_signing_private_key.as_deref().ok_or_else(|| {
            ProtocolError::Configuration("application has no master key pair".to_string())
        })?;
        let signer = SigningKeyPair::from_secret_bytes(master_key)?;

        let activation_id = self.generate_activation_id().await?;
        let activation_code = self.generate_unique_code(&application.id).await?;
        let code_signature = BASE64.encode(signer.sign(activation_code.as_bytes()));

        let server_keys = EcKeyPair::generate();
        let (wrapped_private, encryption_mode) = self.keys.wrap_server_private(
            &server_keys.secret_bytes(),
            &request.user_id,
            &activation_id,
        )?;

        let now = Utc::now();
        let activation = Activation {
            id: activation_id,
            user_id: request.user_id,
            application_id: application.id,
            activation_code,
            activation_code_signature: code_signature,
            status: ActivationStatus::Created,
            blocked_reason: None,
            protocol_version: None,
            server_private_key: wrapped_private,
            server_key_encryption: encryption_mode,
            server_public_key: server_keys.public_bytes().to_vec(),
            device_public_key: None,
            counter: 0,
            ctr_data: None,
            failed_attempts: 0,
            max_failed_attempts: request
                .max_failed_attempts
                .unwrap_or(self.config.default_max_failed_attempts),
            created_at: now,
            expires_at: request
                .expires_at
                .unwrap_or(now + chrono::Duration::seconds(self.config.activation_validity_secs)),
            last_used_at: None,
            status_changed_at: now,
        };

        let response = InitActivationResponse {
            activation_id: activation.id,
            activation_code: activation.activation_code.clone(),
            activation_code_signature: activation.activation_code_signature.clone(),
        };

        self.activations.create_activation(activation.clone()).await?;
        self.activations
            .append_activation_history(activation.history_record(now))
            .await?;
        self.notify_status(&activation);

        info!(activation_id = %response.activation_id, "activation initialized");
        Ok(response)
    }

    /// Key exchange: opens the device envelope, stores the device
    /// public key, initializes the hash-chain seed and moves the
    /// activation to OTP_USED.
    ///
    /// An unparseable device key forces the activation to REMOVED
    /// before the error is surfaced — poisoned key material is never
    /// retried.
    pub async fn prepare_activation(
        &self,
        request: PrepareActivationRequest,
    ) -> ProtocolResult<PrepareActivationResponse> {
        if !validate_activation_code(&request.activation_code) {
            return Err(ProtocolError::InvalidInput(format!(
                "activation code must be {ACTIVATION_CODE_LENGTH} characters"
            )));
        }

        let application = self
            .applications
            .get_application_by_key(&request.application_key)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("application".to_string()))?;

        let found = self
            .activations
            .find_activation_by_code(
                &application.id,
                &request.activation_code,
                &[ActivationStatus::Created, ActivationStatus::OtpUsed],
            )
            .await?
            .ok_or_else(|| ProtocolError::NotFound("activation".to_string()))?;

        let lease = self.activations.lock_activation(&found.id);
        let _guard = lease.lock().await;

        // Re-read under the lock; the code lookup ran outside it.
        let mut activation = self
            .activations
            .get_activation(&found.id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("activation".to_string()))?;

        let now = Utc::now();
        if activation.provisioning_expired(now) {
            self.transition(&mut activation, ActivationStatus::Removed, now)
                .await?;
            return Err(ProtocolError::InvalidState(
                "activation code expired".to_string(),
            ));
        }
        if !activation.status.is_provisioning() {
            return Err(ProtocolError::InvalidState(format!(
                "activation is {:?}",
                activation.status
            )));
        }

        let (plaintext, response_key) = armature_crypto::open(
            &application.master_encryption_private_key,
            application.application_secret.as_bytes(),
            &request.envelope,
        )?;
        let payload: DeviceProvisioningPayload = serde_json::from_slice(&plaintext)
            .map_err(|e| ProtocolError::InvalidInput(format!("malformed device payload: {e}")))?;

        let device_public_key = match self.parse_device_key(&payload.device_public_key) {
            Ok(key) => key,
            Err(err) => {
                // Compensating transition: never leave key material in
                // an ambiguous state.
                self.transition(&mut activation, ActivationStatus::Removed, now)
                    .await?;
                return Err(err);
            }
        };

        if let Some(existing) = &activation.device_public_key {
            if *existing != device_public_key {
                return Err(ProtocolError::InvalidState(
                    "device public key already set".to_string(),
                ));
            }
        }

        let ctr_seed = armature_crypto::generate_ctr_seed();
        activation.device_public_key = Some(device_public_key);
        activation.ctr_data = Some(ctr_seed);
        activation.counter = 0;
        activation.protocol_version = Some(ProtocolVersion::V3);
        self.transition(&mut activation, ActivationStatus::OtpUsed, now)
            .await?;

        let server_payload = ServerProvisioningPayload {
            server_public_key: BASE64.encode(&activation.server_public_key),
            ctr_data: BASE64.encode(ctr_seed),
        };
        let encrypted_payload = encrypt(&response_key, &serde_json::to_vec(&server_payload)?)?;

        debug!(activation_id = %activation.id, "activation prepared");
        Ok(PrepareActivationResponse {
            activation_id: activation.id,
            user_id: activation.user_id.clone(),
            encrypted_payload,
        })
    }

    /// OTP_USED → ACTIVE. Any other source state is a state error.
    pub async fn commit_activation(&self, id: &ActivationId) -> ProtocolResult<Activation> {
        let lease = self.activations.lock_activation(id);
        let _guard = lease.lock().await;

        let mut activation = self.load(id).await?;
        let now = Utc::now();
        if activation.provisioning_expired(now) {
            self.transition(&mut activation, ActivationStatus::Removed, now)
                .await?;
            return Err(ProtocolError::InvalidState(
                "activation code expired".to_string(),
            ));
        }
        if activation.status != ActivationStatus::OtpUsed {
            return Err(ProtocolError::InvalidState(format!(
                "cannot commit activation in status {:?}",
                activation.status
            )));
        }

        self.transition(&mut activation, ActivationStatus::Active, now)
            .await?;
        info!(activation_id = %activation.id, "activation committed");
        Ok(activation)
    }

    /// Status query.
    ///
    /// CREATED activations get a randomized opaque blob (no key
    /// material exists yet) plus the signed activation code; once a
    /// device key exists the blob is real and encrypted under the
    /// transport key. Unknown ids get a synthetic REMOVED response.
    pub async fn get_activation_status(
        &self,
        id: &ActivationId,
    ) -> ProtocolResult<ActivationStatusResponse> {
        let Some(activation) = self.activations.get_activation(id).await? else {
            return Ok(Self::synthetic_removed(*id));
        };

        let now = Utc::now();
        let activation = if activation.provisioning_expired(now) {
            let lease = self.activations.lock_activation(id);
            let _guard = lease.lock().await;
            let mut activation = self.load(id).await?;
            // Still stale after acquiring the lock?
            if activation.provisioning_expired(now) {
                self.transition(&mut activation, ActivationStatus::Removed, now)
                    .await?;
            }
            activation
        } else {
            activation
        };

        let blob = match &activation.device_public_key {
            None => Self::random_blob(),
            Some(_) => {
                let transport_key = self.keys.transport_key(&activation)?;
                let blob = StatusBlob {
                    status: activation.status,
                    protocol_version: activation.protocol_version,
                    failed_attempts: activation.failed_attempts,
                    max_failed_attempts: activation.max_failed_attempts,
                };
                encrypt(&transport_key, &serde_json::to_vec(&blob)?)?.to_base64()
            }
        };

        let fingerprint = match (&activation.device_public_key, activation.protocol_version) {
            (Some(device_key), Some(version)) => Some(compute_fingerprint(
                version,
                device_key,
                &activation.id,
                &activation.server_public_key,
            )),
            _ => None,
        };

        Ok(ActivationStatusResponse {
            activation_id: activation.id,
            status: activation.status,
            blocked_reason: activation.blocked_reason.clone(),
            protocol_version: activation.protocol_version,
            encrypted_status_blob: blob,
            activation_code_signature: (activation.status == ActivationStatus::Created)
                .then(|| activation.activation_code_signature.clone()),
            device_fingerprint: fingerprint,
            remaining_attempts: activation.remaining_attempts(),
            created_at: activation.created_at,
            expires_at: activation.expires_at,
            last_used_at: activation.last_used_at,
        })
    }

    /// ACTIVE → BLOCKED. A no-op outside ACTIVE.
    pub async fn block_activation(
        &self,
        id: &ActivationId,
        reason: Option<String>,
    ) -> ProtocolResult<Activation> {
        let lease = self.activations.lock_activation(id);
        let _guard = lease.lock().await;

        let mut activation = self.load(id).await?;
        if activation.status != ActivationStatus::Active {
            return Ok(activation);
        }

        activation.blocked_reason =
            Some(reason.unwrap_or_else(|| BLOCKED_REASON_NOT_SPECIFIED.to_string()));
        self.transition(&mut activation, ActivationStatus::Blocked, Utc::now())
            .await?;
        info!(activation_id = %activation.id, "activation blocked");
        Ok(activation)
    }

    /// BLOCKED → ACTIVE; clears the reason and resets the failure
    /// budget. A no-op outside BLOCKED.
    pub async fn unblock_activation(&self, id: &ActivationId) -> ProtocolResult<Activation> {
        let lease = self.activations.lock_activation(id);
        let _guard = lease.lock().await;

        let mut activation = self.load(id).await?;
        if activation.status != ActivationStatus::Blocked {
            return Ok(activation);
        }

        activation.failed_attempts = 0;
        self.transition(&mut activation, ActivationStatus::Active, Utc::now())
            .await?;
        info!(activation_id = %activation.id, "activation unblocked");
        Ok(activation)
    }

    /// Any state → REMOVED. Terminal; a no-op when already removed.
    pub async fn remove_activation(&self, id: &ActivationId) -> ProtocolResult<Activation> {
        let lease = self.activations.lock_activation(id);
        let _guard = lease.lock().await;

        let mut activation = self.load(id).await?;
        if activation.status == ActivationStatus::Removed {
            return Ok(activation);
        }

        self.transition(&mut activation, ActivationStatus::Removed, Utc::now())
            .await?;
        info!(activation_id = %activation.id, "activation removed");
        Ok(activation)
    }

    /// Activations of one user, optionally restricted to an
    /// application. Applies the lazy expiration check to each result.
    pub async fn lookup_activations(
        &self,
        user_id: &UserId,
        application_id: Option<&ApplicationId>,
    ) -> ProtocolResult<Vec<Activation>> {
        let now = Utc::now();
        let mut result = Vec::new();
        for activation in self.activations.list_activations_by_user(user_id, application_id).await? {
            if activation.provisioning_expired(now) {
                let lease = self.activations.lock_activation(&activation.id);
                let _guard = lease.lock().await;
                let mut activation = self.load(&activation.id).await?;
                if activation.provisioning_expired(now) {
                    self.transition(&mut activation, ActivationStatus::Removed, now)
                        .await?;
                }
                result.push(activation);
            } else {
                result.push(activation);
            }
        }
        Ok(result)
    }

    /// Bulk sweep over stale provisioning activations. Idempotent with
    /// the lazy per-access check. Returns the number removed.
    pub async fn expire_stale_activations(&self) -> ProtocolResult<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for stale in self.activations.list_provisioning_expired(now).await? {
            let lease = self.activations.lock_activation(&stale.id);
            let _guard = lease.lock().await;
            let mut activation = self.load(&stale.id).await?;
            if activation.provisioning_expired(now) {
                self.transition(&mut activation, ActivationStatus::Removed, now)
                    .await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "expired stale activations");
        }
        Ok(removed)
    }

    /// Starts the 2→3 upgrade: generates and persists a hash-chain seed
    /// for an ACTIVE version-2 activation. Idempotent while pending.
    /// Returns the seed encrypted under the transport key.
    pub async fn start_upgrade(&self, id: &ActivationId) -> ProtocolResult<EncryptedData> {
        let lease = self.activations.lock_activation(id);
        let _guard = lease.lock().await;

        let mut activation = self.load(id).await?;
        if activation.status != ActivationStatus::Active {
            return Err(ProtocolError::InvalidState(format!(
                "cannot upgrade activation in status {:?}",
                activation.status
            )));
        }
        if activation.protocol_version != Some(ProtocolVersion::V2) {
            return Err(ProtocolError::InvalidState(
                "activation is not version 2".to_string(),
            ));
        }

        let seed = match activation.ctr_data {
            Some(seed) => seed,
            None => {
                let seed = armature_crypto::generate_ctr_seed();
                activation.ctr_data = Some(seed);
                self.activations.update_activation(&activation).await?;
                seed
            }
        };

        let transport_key = self.keys.transport_key(&activation)?;
        Ok(encrypt(&transport_key, &seed)?)
    }

    /// Finishes the 2→3 upgrade: fixes the version at 3. Requires a
    /// pending seed from [`ActivationManager::start_upgrade`].
    pub async fn commit_upgrade(&self, id: &ActivationId) -> ProtocolResult<Activation> {
        let lease = self.activations.lock_activation(id);
        let _guard = lease.lock().await;

        let mut activation = self.load(id).await?;
        if activation.status != ActivationStatus::Active
            || activation.protocol_version != Some(ProtocolVersion::V2)
            || activation.ctr_data.is_none()
        {
            return Err(ProtocolError::InvalidState(
                "no upgrade is pending for this activation".to_string(),
            ));
        }

        activation.protocol_version = Some(ProtocolVersion::V3);
        self.activations.update_activation(&activation).await?;
        info!(activation_id = %activation.id, "activation upgraded to version 3");
        Ok(activation)
    }

    async fn load(&self, id: &ActivationId) -> ProtocolResult<Activation> {
        self.activations
            .get_activation(id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("activation".to_string()))
    }

    /// Applies a status change, persists it, appends history and emits
    /// the callback event. History and the status write commit
    /// together; the callback is fire-and-forget by contract.
    async fn transition(
        &self,
        activation: &mut Activation,
        status: ActivationStatus,
        now: DateTime<Utc>,
    ) -> ProtocolResult<()> {
        activation.set_status(status, now);
        self.activations.update_activation(activation).await?;
        self.activations
            .append_activation_history(activation.history_record(now))
            .await?;
        self.notify_status(activation);
        Ok(())
    }

    fn notify_status(&self, activation: &Activation) {
        self.callbacks.notify(CallbackMessage {
            application_id: activation.application_id,
            payload: CallbackPayload::ActivationStatusChanged {
                activation_id: activation.id,
                user_id: activation.user_id.clone(),
                status: activation.status,
                reason: activation.blocked_reason.clone(),
            },
        });
    }

    async fn generate_activation_id(&self) -> ProtocolResult<ActivationId> {
        for _ in 0..self.config.id_generation_attempts {
            let id = ActivationId::new();
            if self.activations.get_activation(&id).await?.is_none() {
                return Ok(id);
            }
        }
        Err(ProtocolError::ExhaustedRetries("activation id"))
    }

    async fn generate_unique_code(
        &self,
        application_id: &ApplicationId,
    ) -> ProtocolResult<String> {
        for _ in 0..self.config.id_generation_attempts {
            let code = generate_activation_code();
            let existing = self
                .activations
                .find_activation_by_code(
                    application_id,
                    &code,
                    &[ActivationStatus::Created, ActivationStatus::OtpUsed],
                )
                .await?;
            if existing.is_none() {
                return Ok(code);
            }
        }
        Err(ProtocolError::ExhaustedRetries("activation code"))
    }

    fn parse_device_key(&self, encoded: &str) -> ProtocolResult<Vec<u8>> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| ProtocolError::InvalidInput(format!("invalid device key: {e}")))?;
        if bytes.len() != armature_crypto::PUBLIC_KEY_SIZE {
            return Err(ProtocolError::InvalidInput(
                "device public key must be 32 bytes".to_string(),
            ));
        }
        Ok(bytes)
    }

    fn synthetic_removed(id: ActivationId) -> ActivationStatusResponse {
        ActivationStatusResponse {
            activation_id: id,
            status: ActivationStatus::Removed,
            blocked_reason: None,
            protocol_version: None,
            encrypted_status_blob: Self::random_blob(),
            activation_code_signature: None,
            device_fingerprint: None,
            remaining_attempts: 0,
            created_at: DateTime::UNIX_EPOCH,
            expires_at: DateTime::UNIX_EPOCH,
            last_used_at: None,
        }
    }

    /// Indistinguishable-from-ciphertext filler for states where no
    /// key material exists.
    fn random_blob() -> String {
        let mut blob = [0u8; 60];
        rand::rngs::OsRng.fill_bytes(&mut blob);
        BASE64.encode(blob)
    }
}

/// Generates a fresh application with key material and returns it.
/// The caller persists it through its [`ApplicationStore`].
#[must_use]
pub(crate) fn new_application(name: &str) -> Application {
    let signing = SigningKeyPair::generate();
    let encryption = EcKeyPair::generate();
    let mut key_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut key_bytes);
    let application_key = BASE64.encode(key_bytes);
    let mut secret_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut secret_bytes);
    let application_secret = BASE64.encode(secret_bytes);

    Application {
        id: ApplicationId::new(),
        name: name.to_string(),
        application_key,
        application_secret,
        master_signing_public_key: signing.public_bytes().to_vec(),
        master_signing_private_key: Some(signing.secret_bytes().to_vec()),
        master_encryption_public_key: encryption.public_bytes().to_vec(),
        master_encryption_private_key: encryption.secret_bytes().to_vec(),
    }
}

/// Checks an activation code signature against an application's master
/// verifying key. Client-side helper mirrored here for tests and
/// embedders.
pub fn verify_activation_code_signature(
    application: &Application,
    activation_code: &str,
    signature_base64: &str,
) -> ProtocolResult<bool> {
    let signature = BASE64
        .decode(signature_base64)
        .map_err(|e| ProtocolError::InvalidInput(format!("invalid signature: {e}")))?;
    Ok(verify_signature(
        &application.master_signing_public_key,
        activation_code.as_bytes(),
        &signature,
    )?)
}
