//! Token authentication subsystem.
//!
//! Tokens are a cheaper substitute for full signatures: a random secret
//! issued against an active activation, later proven by an HMAC digest
//! over a client nonce and timestamp. Issuance strength travels with
//! the token as the factor used to request it.

use armature_crypto::{compute_token_digest, decrypt, encrypt, signatures_match, EncryptedData};
use armature_model::{ActivationStatus, Token};
use armature_store::{ActivationStore, TokenStore};
use armature_types::{ActivationId, SignatureFactor, TokenId, UserId};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::keys::KeyProvider;

/// Request to issue a token.
#[derive(Debug, Clone)]
pub struct CreateTokenRequest {
    pub activation_id: ActivationId,
    /// Factor the requesting signature was verified with.
    pub factor: SignatureFactor,
    /// Request payload sealed under the transport key. Must decrypt to
    /// a non-empty payload.
    pub encrypted_payload: EncryptedData,
}

/// Plaintext of the sealed issuance response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenIssuePayload {
    pub token_id: TokenId,
    /// Token secret, base64.
    pub token_secret: String,
}

/// Result of token issuance: the payload sealed under the transport key.
#[derive(Debug, Clone)]
pub struct CreateTokenResponse {
    pub encrypted_payload: EncryptedData,
}

/// Token digest validation inputs.
#[derive(Debug, Clone)]
pub struct TokenValidationRequest {
    pub token_id: TokenId,
    pub nonce: Vec<u8>,
    pub timestamp: i64,
    /// Claimed digest, base64.
    pub digest: String,
}

/// Validation outcome. `valid == false` with empty fields means the
/// token does not exist — deliberately not an error.
#[derive(Debug, Clone)]
pub struct TokenValidation {
    pub valid: bool,
    pub activation_id: Option<ActivationId>,
    pub user_id: Option<UserId>,
    pub factor: Option<SignatureFactor>,
}

/// Manages simple authentication tokens.
#[derive(Clone)]
pub struct TokenManager {
    config: ProtocolConfig,
    tokens: Arc<dyn TokenStore>,
    activations: Arc<dyn ActivationStore>,
    keys: Arc<KeyProvider>,
}

impl TokenManager {
    pub(crate) fn new(
        config: ProtocolConfig,
        tokens: Arc<dyn TokenStore>,
        activations: Arc<dyn ActivationStore>,
        keys: Arc<KeyProvider>,
    ) -> Self {
        Self {
            config,
            tokens,
            activations,
            keys,
        }
    }

    /// Issues a token against an ACTIVE activation.
    pub async fn create_token(
        &self,
        request: CreateTokenRequest,
    ) -> ProtocolResult<CreateTokenResponse> {
        let activation = self
            .activations
            .get_activation(&request.activation_id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("activation".to_string()))?;
        if activation.status != ActivationStatus::Active {
            return Err(ProtocolError::InvalidState(format!(
                "activation is {:?}",
                activation.status
            )));
        }

        let transport_key = self.keys.transport_key(&activation)?;
        let payload = decrypt(&transport_key, &request.encrypted_payload)?;
        // An empty payload is a protocol violation, not "nothing to do".
        if payload.is_empty() {
            return Err(ProtocolError::InvalidInput(
                "empty token request payload".to_string(),
            ));
        }

        let token_id = self.generate_token_id().await?;
        let mut secret = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);

        let token = Token {
            id: token_id,
            secret: secret.clone(),
            activation_id: activation.id,
            factor: request.factor,
            created_at: Utc::now(),
        };
        self.tokens.create_token(token).await?;

        let response_payload = TokenIssuePayload {
            token_id,
            token_secret: BASE64.encode(&secret),
        };
        let encrypted_payload =
            encrypt(&transport_key, &serde_json::to_vec(&response_payload)?)?;

        info!(token_id = %token_id, activation_id = %activation.id, "token created");
        Ok(CreateTokenResponse { encrypted_payload })
    }

    /// Validates a token digest.
    ///
    /// An unknown token id yields `valid == false` without an error; a
    /// known token whose activation is gone or no longer ACTIVE is a
    /// hard failure.
    pub async fn validate_token(
        &self,
        request: TokenValidationRequest,
    ) -> ProtocolResult<TokenValidation> {
        let Some(token) = self.tokens.get_token(&request.token_id).await? else {
            debug!(token_id = %request.token_id, "validation of unknown token");
            return Ok(TokenValidation {
                valid: false,
                activation_id: None,
                user_id: None,
                factor: None,
            });
        };

        let activation = self
            .activations
            .get_activation(&token.activation_id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("activation".to_string()))?;
        if activation.status != ActivationStatus::Active {
            return Err(ProtocolError::InvalidState(format!(
                "activation is {:?}",
                activation.status
            )));
        }

        let expected = compute_token_digest(&token.secret, &request.nonce, request.timestamp);
        Ok(TokenValidation {
            valid: signatures_match(&expected, &request.digest),
            activation_id: Some(token.activation_id),
            user_id: Some(activation.user_id),
            factor: Some(token.factor),
        })
    }

    /// Removes a token, but only when the caller-supplied activation
    /// owns it. Returns whether anything was deleted.
    pub async fn remove_token(
        &self,
        token_id: &TokenId,
        activation_id: &ActivationId,
    ) -> ProtocolResult<bool> {
        let Some(token) = self.tokens.get_token(token_id).await? else {
            return Ok(false);
        };
        if token.activation_id != *activation_id {
            return Ok(false);
        }
        Ok(self.tokens.remove_token(token_id).await?)
    }

    async fn generate_token_id(&self) -> ProtocolResult<TokenId> {
        for _ in 0..self.config.id_generation_attempts {
            let id = TokenId::new();
            if self.tokens.get_token(&id).await?.is_none() {
                return Ok(id);
            }
        }
        Err(ProtocolError::ExhaustedRetries("token id"))
    }
}
