mod common;

use armature_crypto::{encrypt, verify_password, EcKeyPair};
use armature_model::{PukStatus, RecoveryCodeStatus, RecoveryConfig};
use armature_protocol::{
    derive_recovery_credentials, validate_activation_code, ConfirmRecoveryPayload,
    CreateRecoveryCodeRequest, ProtocolError,
};
use armature_store::{RecoveryCodeQuery, RecoveryCodeStore};
use armature_types::ApplicationId;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::{setup, Device, TestEnv};
use pretty_assertions::assert_eq;

/// Enables postcard recovery for the test application. Returns the
/// printing-center key pair and the postcard public key, which together
/// let the test re-derive the shared secret the way the printing center
/// would.
async fn enable_postcard(env: &TestEnv, multiple_codes_allowed: bool) -> (EcKeyPair, [u8; 32]) {
    let postcard = EcKeyPair::generate();
    let printing = EcKeyPair::generate();
    let postcard_public = postcard.public_bytes();
    env.engine
        .recovery
        .update_recovery_config(RecoveryConfig {
            application_id: env.application.id,
            recovery_enabled: true,
            postcard_enabled: true,
            multiple_codes_allowed,
            postcard_private_key: Some(postcard.secret_bytes().to_vec()),
            postcard_public_key: Some(postcard_public.to_vec()),
            remote_public_key: Some(printing.public_bytes().to_vec()),
        })
        .await
        .unwrap();
    (printing, postcard_public)
}

fn create_request(env: &TestEnv, user_id: &str) -> CreateRecoveryCodeRequest {
    CreateRecoveryCodeRequest {
        application_id: env.application.id,
        user_id: user_id.into(),
        activation_id: None,
        puk_count: None,
    }
}

#[tokio::test]
async fn recovery_config_is_lazily_created_disabled() {
    let env = setup().await;

    let config = env
        .engine
        .recovery
        .recovery_config(&env.application.id)
        .await
        .unwrap();
    assert!(!config.recovery_enabled);
    assert!(!config.postcard_ready());
    assert!(config.postcard_private_key.is_none());

    let err = env
        .engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Configuration(_)));
}

#[tokio::test]
async fn config_updates_require_a_known_application() {
    let env = setup().await;
    let err = env
        .engine
        .recovery
        .update_recovery_config(RecoveryConfig::disabled(ApplicationId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NotFound(_)));
}

#[tokio::test]
async fn created_code_is_well_formed_and_hashed_at_rest() {
    let env = setup().await;
    enable_postcard(&env, false).await;

    let response = env
        .engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap();

    assert!(validate_activation_code(&response.recovery_code));
    assert_eq!(response.puk_indices, vec![1, 2, 3]);

    let stored = env
        .store
        .get_recovery_code(&response.recovery_code_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RecoveryCodeStatus::Created);
    assert_eq!(stored.puks.len(), 3);
    for puk in &stored.puks {
        assert_eq!(puk.status, PukStatus::Valid);
        // PHC strings only; the raw PUK value never reaches storage.
        assert!(puk.puk_hash.starts_with("$argon2id$"));
    }
}

#[tokio::test]
async fn printing_center_regenerates_identical_credentials() {
    let env = setup().await;
    let (printing, postcard_public) = enable_postcard(&env, false).await;

    let response = env
        .engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap();

    // The printing center holds the remote private key and the postcard
    // public key: the same agreement, the same nonce, the same values.
    let shared = printing.ecdh(&postcard_public).unwrap();
    let nonce = BASE64.decode(&response.puk_derivation_nonce).unwrap();
    let (code, puks) = derive_recovery_credentials(shared.as_bytes(), &nonce, 3);

    assert_eq!(code, response.recovery_code);
    let stored = env
        .store
        .get_recovery_code(&response.recovery_code_id)
        .await
        .unwrap()
        .unwrap();
    for (value, row) in puks.iter().zip(&stored.puks) {
        assert_eq!(value.len(), 10);
        assert!(value.bytes().all(|b| b.is_ascii_digit()));
        assert!(verify_password(value.as_bytes(), &row.puk_hash).unwrap());
    }
    // And PUKs do not verify against each other's rows.
    assert!(!verify_password(puks[0].as_bytes(), &stored.puks[1].puk_hash).unwrap()
        || puks[0] == puks[1]);
}

#[tokio::test]
async fn one_non_revoked_code_per_user_unless_allowed() {
    let env = setup().await;
    enable_postcard(&env, false).await;

    let first = env
        .engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap();

    let err = env
        .engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState(_)));

    // Revoking the first frees the slot.
    env.engine
        .recovery
        .revoke_recovery_codes(&[first.recovery_code_id])
        .await
        .unwrap();
    env.engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap();
}

#[tokio::test]
async fn multiple_codes_flag_lifts_the_limit() {
    let env = setup().await;
    enable_postcard(&env, true).await;

    env.engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap();
    env.engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap();
}

#[tokio::test]
async fn confirmation_activates_the_code_and_is_idempotent() {
    let env = setup().await;
    enable_postcard(&env, false).await;
    let device = Device::activate(&env, "alice").await;

    let created = env
        .engine
        .recovery
        .create_recovery_code(CreateRecoveryCodeRequest {
            activation_id: Some(device.activation_id),
            ..create_request(&env, "alice")
        })
        .await
        .unwrap();

    let payload = ConfirmRecoveryPayload {
        recovery_code: created.recovery_code.clone(),
    };
    let sealed = encrypt(
        &device.transport_key(),
        &serde_json::to_vec(&payload).unwrap(),
    )
    .unwrap();

    let first = env
        .engine
        .recovery
        .confirm_recovery_code(&device.activation_id, &sealed)
        .await
        .unwrap();
    assert!(!first.already_confirmed);

    let stored = env
        .store
        .get_recovery_code(&created.recovery_code_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RecoveryCodeStatus::Active);
    assert!(stored.puks.iter().all(|p| p.status == PukStatus::Valid));

    // Confirming again changes nothing and says so.
    let sealed = encrypt(
        &device.transport_key(),
        &serde_json::to_vec(&payload).unwrap(),
    )
    .unwrap();
    let second = env
        .engine
        .recovery
        .confirm_recovery_code(&device.activation_id, &sealed)
        .await
        .unwrap();
    assert!(second.already_confirmed);

    let unchanged = env
        .store
        .get_recovery_code(&created.recovery_code_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.status, RecoveryCodeStatus::Active);
}

#[tokio::test]
async fn confirmation_rejects_codes_of_other_users() {
    let env = setup().await;
    enable_postcard(&env, false).await;
    let device = Device::activate(&env, "alice").await;

    let created = env
        .engine
        .recovery
        .create_recovery_code(create_request(&env, "bob"))
        .await
        .unwrap();

    let payload = ConfirmRecoveryPayload {
        recovery_code: created.recovery_code,
    };
    let sealed = encrypt(
        &device.transport_key(),
        &serde_json::to_vec(&payload).unwrap(),
    )
    .unwrap();

    // Same error shape as a nonexistent code.
    let err = env
        .engine
        .recovery
        .confirm_recovery_code(&device.activation_id, &sealed)
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NotFound(_)));
}

#[tokio::test]
async fn confirmation_requires_an_active_activation() {
    let env = setup().await;
    enable_postcard(&env, false).await;
    let device = Device::activate(&env, "alice").await;
    env.engine
        .activations
        .block_activation(&device.activation_id, None)
        .await
        .unwrap();

    let sealed = encrypt(&device.transport_key(), b"{}").unwrap();
    let err = env
        .engine
        .recovery
        .confirm_recovery_code(&device.activation_id, &sealed)
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState(_)));
}

#[tokio::test]
async fn revocation_cascades_to_valid_puks_and_is_idempotent() {
    let env = setup().await;
    enable_postcard(&env, false).await;

    let created = env
        .engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap();

    assert_eq!(
        env.engine
            .recovery
            .revoke_recovery_codes(&[created.recovery_code_id])
            .await
            .unwrap(),
        1
    );
    let stored = env
        .store
        .get_recovery_code(&created.recovery_code_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RecoveryCodeStatus::Revoked);
    assert!(stored.puks.iter().all(|p| p.status == PukStatus::Invalid));

    // Revoking again, or revoking an unknown id, changes nothing.
    assert_eq!(
        env.engine
            .recovery
            .revoke_recovery_codes(&[
                created.recovery_code_id,
                armature_types::RecoveryCodeId::new()
            ])
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn lookup_masks_the_code_value() {
    let env = setup().await;
    enable_postcard(&env, false).await;

    let created = env
        .engine
        .recovery
        .create_recovery_code(create_request(&env, "alice"))
        .await
        .unwrap();

    let summaries = env
        .engine
        .recovery
        .lookup_recovery_codes(&RecoveryCodeQuery {
            application_id: Some(env.application.id),
            user_id: Some("alice".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(summaries.len(), 1);
    let last_group = &created.recovery_code[18..];
    assert_eq!(
        summaries[0].masked_code,
        format!("*****-*****-*****-{last_group}")
    );
    assert_eq!(summaries[0].puk_statuses, vec![PukStatus::Valid; 3]);

    // Status filters narrow the result.
    let revoked_only = env
        .engine
        .recovery
        .lookup_recovery_codes(&RecoveryCodeQuery {
            application_id: Some(env.application.id),
            status: Some(RecoveryCodeStatus::Revoked),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(revoked_only.is_empty());
}
