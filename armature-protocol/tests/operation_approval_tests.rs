mod common;

use armature_model::{OperationStatus, OperationTemplate};
use armature_protocol::{
    ApprovalOutcome, ApproveOperationRequest, CreateOperationRequest, ProtocolError,
    RejectOutcome,
};
use armature_store::{OperationStore, OperationTemplateStore};
use armature_types::{ApplicationId, SignatureFactor, UserId};
use common::{setup, TestEnv};
use pretty_assertions::assert_eq;
use std::collections::HashMap;

async fn payment_template(env: &TestEnv) {
    payment_template_with_expiration(env, 300).await;
}

async fn payment_template_with_expiration(env: &TestEnv, expiration_secs: i64) {
    env.store
        .upsert_template(OperationTemplate {
            name: "payment".to_string(),
            operation_type: "payment".to_string(),
            data_template: "Pay {amount} to {recipient}".to_string(),
            allowed_factors: vec![
                SignatureFactor::PossessionKnowledge,
                SignatureFactor::PossessionBiometry,
            ],
            max_failure_count: 3,
            expiration_secs,
        })
        .await
        .unwrap();
}

fn payment_parameters() -> HashMap<String, String> {
    HashMap::from([
        ("amount".to_string(), "100".to_string()),
        ("recipient".to_string(), "Bob".to_string()),
    ])
}

fn create_request(env: &TestEnv) -> CreateOperationRequest {
    CreateOperationRequest {
        user_id: "alice".into(),
        application_ids: vec![env.application.id],
        template_name: "payment".to_string(),
        parameters: payment_parameters(),
        external_id: Some("order-42".to_string()),
        risk_flags: None,
    }
}

fn approve_request(
    env: &TestEnv,
    operation: &armature_model::Operation,
    data: &str,
    factor: SignatureFactor,
) -> ApproveOperationRequest {
    ApproveOperationRequest {
        operation_id: operation.id,
        user_id: "alice".into(),
        application_id: env.application.id,
        data: data.to_string(),
        factor,
    }
}

#[tokio::test]
async fn data_is_rendered_once_from_the_template() {
    let env = setup().await;
    payment_template(&env).await;

    let operation = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    assert_eq!(operation.data, "Pay 100 to Bob");
    assert_eq!(operation.status, OperationStatus::Pending);
    assert_eq!(operation.operation_type, "payment");
    assert_eq!(operation.max_failure_count, 3);
    assert_eq!(operation.external_id.as_deref(), Some("order-42"));
    assert!(operation.finalized_at.is_none());
}

#[tokio::test]
async fn missing_parameters_stay_visible_in_the_rendered_data() {
    let env = setup().await;
    payment_template(&env).await;

    let operation = env
        .engine
        .operations
        .create_operation(CreateOperationRequest {
            parameters: HashMap::from([("amount".to_string(), "100".to_string())]),
            ..create_request(&env)
        })
        .await
        .unwrap();

    // An unfilled placeholder surfaces in the data instead of silently
    // vanishing, so approval against it will fail loudly.
    assert_eq!(operation.data, "Pay 100 to {recipient}");
}

#[tokio::test]
async fn create_requires_template_and_applications() {
    let env = setup().await;
    payment_template(&env).await;

    let err = env
        .engine
        .operations
        .create_operation(CreateOperationRequest {
            template_name: "no-such-template".to_string(),
            ..create_request(&env)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NotFound(_)));

    let err = env
        .engine
        .operations
        .create_operation(CreateOperationRequest {
            application_ids: vec![],
            ..create_request(&env)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidInput(_)));

    let err = env
        .engine
        .operations
        .create_operation(CreateOperationRequest {
            application_ids: vec![ApplicationId::new()],
            ..create_request(&env)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NotFound(_)));
}

#[tokio::test]
async fn exact_data_match_with_allowed_factor_approves() {
    let env = setup().await;
    payment_template(&env).await;
    let operation = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    let outcome = env
        .engine
        .operations
        .attempt_approve(approve_request(
            &env,
            &operation,
            "Pay 100 to Bob",
            SignatureFactor::PossessionKnowledge,
        ))
        .await
        .unwrap();

    let ApprovalOutcome::Approved(approved) = outcome else {
        panic!("expected approval");
    };
    assert_eq!(approved.status, OperationStatus::Approved);
    assert!(approved.finalized_at.is_some());
}

#[tokio::test]
async fn mismatched_data_charges_the_failure_budget() {
    let env = setup().await;
    payment_template(&env).await;
    let operation = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    let outcome = env
        .engine
        .operations
        .attempt_approve(approve_request(
            &env,
            &operation,
            "Pay 100 to Carol",
            SignatureFactor::PossessionKnowledge,
        ))
        .await
        .unwrap();

    let ApprovalOutcome::ApprovalFailed {
        operation,
        remaining_attempts,
    } = outcome
    else {
        panic!("expected approval failure");
    };
    assert_eq!(operation.status, OperationStatus::Pending);
    assert_eq!(operation.failure_count, 1);
    assert_eq!(remaining_attempts, 2);
}

#[tokio::test]
async fn disallowed_factor_charges_the_failure_budget() {
    let env = setup().await;
    payment_template(&env).await;
    let operation = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    let outcome = env
        .engine
        .operations
        .attempt_approve(approve_request(
            &env,
            &operation,
            "Pay 100 to Bob",
            SignatureFactor::Possession,
        ))
        .await
        .unwrap();
    assert!(matches!(outcome, ApprovalOutcome::ApprovalFailed { .. }));
}

#[tokio::test]
async fn exhausted_budget_fails_the_operation_terminally() {
    let env = setup().await;
    payment_template(&env).await;
    let operation = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    for expected_remaining in [2, 1] {
        let outcome = env
            .engine
            .operations
            .attempt_approve(approve_request(
                &env,
                &operation,
                "Pay 100 to Carol",
                SignatureFactor::PossessionKnowledge,
            ))
            .await
            .unwrap();
        let ApprovalOutcome::ApprovalFailed {
            remaining_attempts, ..
        } = outcome
        else {
            panic!("expected approval failure");
        };
        assert_eq!(remaining_attempts, expected_remaining);
    }

    let outcome = env
        .engine
        .operations
        .attempt_approve(approve_request(
            &env,
            &operation,
            "Pay 100 to Carol",
            SignatureFactor::PossessionKnowledge,
        ))
        .await
        .unwrap();
    let ApprovalOutcome::OperationFailed(failed) = outcome else {
        panic!("expected terminal failure");
    };
    assert_eq!(failed.status, OperationStatus::Failed);
    assert!(failed.finalized_at.is_some());

    // The operation left PENDING; a further attempt is a state error,
    // not another failure.
    let err = env
        .engine
        .operations
        .attempt_approve(approve_request(
            &env,
            &operation,
            "Pay 100 to Bob",
            SignatureFactor::PossessionKnowledge,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState(_)));
}

#[tokio::test]
async fn reject_requires_matching_user_and_application() {
    let env = setup().await;
    payment_template(&env).await;
    let operation = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    let outcome = env
        .engine
        .operations
        .reject(&operation.id, &UserId::new("mallory"), &env.application.id)
        .await
        .unwrap();
    assert!(matches!(outcome, RejectOutcome::RejectFailed(_)));
    let stored = env.store.get_operation(&operation.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Pending);

    let outcome = env
        .engine
        .operations
        .reject(&operation.id, &UserId::new("alice"), &env.application.id)
        .await
        .unwrap();
    let RejectOutcome::Rejected(rejected) = outcome else {
        panic!("expected rejection");
    };
    assert_eq!(rejected.status, OperationStatus::Rejected);
}

#[tokio::test]
async fn fail_approval_charges_without_any_matching() {
    let env = setup().await;
    payment_template(&env).await;
    let operation = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    let outcome = env.engine.operations.fail_approval(&operation.id).await.unwrap();
    let ApprovalOutcome::ApprovalFailed {
        operation,
        remaining_attempts,
    } = outcome
    else {
        panic!("expected approval failure");
    };
    assert_eq!(operation.failure_count, 1);
    assert_eq!(remaining_attempts, 2);
}

#[tokio::test]
async fn cancel_is_pending_only() {
    let env = setup().await;
    payment_template(&env).await;
    let operation = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    let canceled = env.engine.operations.cancel(&operation.id).await.unwrap();
    assert_eq!(canceled.status, OperationStatus::Canceled);

    let err = env.engine.operations.cancel(&operation.id).await.unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState(_)));
}

#[tokio::test]
async fn expiry_is_enforced_lazily_on_access() {
    let env = setup().await;
    payment_template_with_expiration(&env, -1).await;
    let operation = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    // The read path itself forces the transition.
    let read = env.engine.operations.get_operation(&operation.id).await.unwrap();
    assert_eq!(read.status, OperationStatus::Expired);
    assert!(read.finalized_at.is_some());

    let err = env
        .engine
        .operations
        .attempt_approve(approve_request(
            &env,
            &operation,
            "Pay 100 to Bob",
            SignatureFactor::PossessionKnowledge,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState(_)));
}

#[tokio::test]
async fn sweep_expires_pending_operations_once() {
    let env = setup().await;
    payment_template_with_expiration(&env, -1).await;
    let stale = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    payment_template(&env).await;
    let fresh = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    assert_eq!(env.engine.operations.expire_pending_operations().await.unwrap(), 1);
    assert_eq!(env.engine.operations.expire_pending_operations().await.unwrap(), 0);

    let stored = env.store.get_operation(&stale.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Expired);
    let stored = env.store.get_operation(&fresh.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Pending);
}

#[tokio::test]
async fn pending_listing_omits_expired_operations() {
    let env = setup().await;
    payment_template_with_expiration(&env, -1).await;
    env.engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();
    payment_template(&env).await;
    let fresh = env
        .engine
        .operations
        .create_operation(create_request(&env))
        .await
        .unwrap();

    let pending = env
        .engine
        .operations
        .list_pending_operations(&UserId::new("alice"), Some(&env.application.id))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, fresh.id);
}
