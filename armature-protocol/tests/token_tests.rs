mod common;

use armature_crypto::{compute_token_digest, decrypt, encrypt};
use armature_protocol::{
    CreateTokenRequest, ProtocolError, TokenIssuePayload, TokenValidationRequest,
};
use armature_types::{SignatureFactor, TokenId};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::{setup, Device, TestEnv};
use pretty_assertions::assert_eq;

async fn issue_token(env: &TestEnv, device: &Device) -> TokenIssuePayload {
    let sealed = encrypt(&device.transport_key(), b"{\"requestObject\":{}}").unwrap();
    let response = env
        .engine
        .tokens
        .create_token(CreateTokenRequest {
            activation_id: device.activation_id,
            factor: SignatureFactor::PossessionKnowledge,
            encrypted_payload: sealed,
        })
        .await
        .unwrap();
    let plaintext = decrypt(&device.transport_key(), &response.encrypted_payload).unwrap();
    serde_json::from_slice(&plaintext).unwrap()
}

#[tokio::test]
async fn issued_token_travels_sealed_and_validates() {
    let env = setup().await;
    let device = Device::activate(&env, "alice").await;
    let issued = issue_token(&env, &device).await;

    let secret = BASE64.decode(&issued.token_secret).unwrap();
    let digest = compute_token_digest(&secret, b"nonce-1", 1_700_000_000);
    let validation = env
        .engine
        .tokens
        .validate_token(TokenValidationRequest {
            token_id: issued.token_id,
            nonce: b"nonce-1".to_vec(),
            timestamp: 1_700_000_000,
            digest,
        })
        .await
        .unwrap();

    assert!(validation.valid);
    assert_eq!(validation.activation_id, Some(device.activation_id));
    assert_eq!(validation.user_id, Some("alice".into()));
    assert_eq!(validation.factor, Some(SignatureFactor::PossessionKnowledge));
}

#[tokio::test]
async fn wrong_digest_is_invalid_but_not_an_error() {
    let env = setup().await;
    let device = Device::activate(&env, "alice").await;
    let issued = issue_token(&env, &device).await;

    let secret = BASE64.decode(&issued.token_secret).unwrap();
    let digest = compute_token_digest(&secret, b"nonce-1", 1_700_000_000);
    let validation = env
        .engine
        .tokens
        .validate_token(TokenValidationRequest {
            token_id: issued.token_id,
            nonce: b"nonce-1".to_vec(),
            // Replayed digest under a different timestamp.
            timestamp: 1_700_000_001,
            digest,
        })
        .await
        .unwrap();
    assert!(!validation.valid);
}

#[tokio::test]
async fn unknown_token_is_a_quiet_no() {
    let env = setup().await;

    let validation = env
        .engine
        .tokens
        .validate_token(TokenValidationRequest {
            token_id: TokenId::new(),
            nonce: b"nonce-1".to_vec(),
            timestamp: 1_700_000_000,
            digest: "AAAA".to_string(),
        })
        .await
        .unwrap();

    assert!(!validation.valid);
    assert_eq!(validation.activation_id, None);
    assert_eq!(validation.user_id, None);
}

#[tokio::test]
async fn token_of_a_blocked_activation_is_a_hard_failure() {
    let env = setup().await;
    let device = Device::activate(&env, "alice").await;
    let issued = issue_token(&env, &device).await;

    env.engine
        .activations
        .block_activation(&device.activation_id, None)
        .await
        .unwrap();

    let secret = BASE64.decode(&issued.token_secret).unwrap();
    let digest = compute_token_digest(&secret, b"nonce-1", 1_700_000_000);
    let err = env
        .engine
        .tokens
        .validate_token(TokenValidationRequest {
            token_id: issued.token_id,
            nonce: b"nonce-1".to_vec(),
            timestamp: 1_700_000_000,
            digest,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState(_)));
}

#[tokio::test]
async fn issuance_requires_an_active_activation() {
    let env = setup().await;
    let device = Device::provision(&env, "alice").await;

    let sealed = encrypt(&device.transport_key(), b"{}").unwrap();
    let err = env
        .engine
        .tokens
        .create_token(CreateTokenRequest {
            activation_id: device.activation_id,
            factor: SignatureFactor::PossessionKnowledge,
            encrypted_payload: sealed,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState(_)));
}

#[tokio::test]
async fn empty_request_payload_is_a_protocol_error() {
    let env = setup().await;
    let device = Device::activate(&env, "alice").await;

    let sealed = encrypt(&device.transport_key(), b"").unwrap();
    let err = env
        .engine
        .tokens
        .create_token(CreateTokenRequest {
            activation_id: device.activation_id,
            factor: SignatureFactor::Possession,
            encrypted_payload: sealed,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidInput(_)));
}

#[tokio::test]
async fn removal_requires_the_owning_activation() {
    let env = setup().await;
    let alice = Device::activate(&env, "alice").await;
    let bob = Device::activate(&env, "bob").await;
    let issued = issue_token(&env, &alice).await;

    // Another activation cannot delete it.
    assert!(!env
        .engine
        .tokens
        .remove_token(&issued.token_id, &bob.activation_id)
        .await
        .unwrap());

    assert!(env
        .engine
        .tokens
        .remove_token(&issued.token_id, &alice.activation_id)
        .await
        .unwrap());
    // Gone means gone.
    assert!(!env
        .engine
        .tokens
        .remove_token(&issued.token_id, &alice.activation_id)
        .await
        .unwrap());
}
