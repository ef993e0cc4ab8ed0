use armature_model::{Operation, OperationStatus, OperationTemplate};
use armature_types::{ApplicationId, OperationId, SignatureFactor};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use std::collections::HashMap;

fn payment_template() -> OperationTemplate {
    OperationTemplate {
        name: "payment".to_string(),
        operation_type: "payment".to_string(),
        data_template: "Pay {amount} to {recipient}".to_string(),
        allowed_factors: vec![SignatureFactor::PossessionKnowledge],
        max_failure_count: 3,
        expiration_secs: 300,
    }
}

#[test]
fn render_substitutes_parameters() {
    let template = payment_template();
    let mut parameters = HashMap::new();
    parameters.insert("amount".to_string(), "100".to_string());
    parameters.insert("recipient".to_string(), "Bob".to_string());

    assert_eq!(template.render_data(&parameters), "Pay 100 to Bob");
}

#[test]
fn render_leaves_unknown_placeholders_verbatim() {
    let template = payment_template();
    let mut parameters = HashMap::new();
    parameters.insert("amount".to_string(), "100".to_string());

    assert_eq!(template.render_data(&parameters), "Pay 100 to {recipient}");
}

#[test]
fn pending_is_the_only_non_terminal_status() {
    assert!(!OperationStatus::Pending.is_terminal());
    for status in [
        OperationStatus::Approved,
        OperationStatus::Rejected,
        OperationStatus::Failed,
        OperationStatus::Expired,
        OperationStatus::Canceled,
    ] {
        assert!(status.is_terminal());
    }
}

#[test]
fn finalize_stamps_timestamp_once() {
    let now = Utc::now();
    let mut operation = Operation {
        id: OperationId::new(),
        user_id: "user-1".into(),
        application_ids: vec![ApplicationId::new()],
        external_id: None,
        operation_type: "payment".to_string(),
        data: "Pay 100 to Bob".to_string(),
        parameters: HashMap::new(),
        status: OperationStatus::Pending,
        allowed_factors: vec![SignatureFactor::PossessionKnowledge],
        failure_count: 0,
        max_failure_count: 3,
        risk_flags: None,
        created_at: now,
        expires_at: now + Duration::seconds(300),
        finalized_at: None,
    };

    assert!(!operation.is_expired(now));
    assert!(operation.is_expired(now + Duration::seconds(301)));

    operation.finalize(OperationStatus::Approved, now);
    assert_eq!(operation.status, OperationStatus::Approved);
    assert_eq!(operation.finalized_at, Some(now));
}
