use armature_model::{PukStatus, RecoveryCode, RecoveryCodeStatus, RecoveryPuk};
use armature_types::{ApplicationId, RecoveryCodeId};
use chrono::Utc;
use pretty_assertions::assert_eq;

fn code_with_puks(status: RecoveryCodeStatus) -> RecoveryCode {
    let now = Utc::now();
    RecoveryCode {
        id: RecoveryCodeId::new(),
        application_id: ApplicationId::new(),
        user_id: "user-1".into(),
        activation_id: None,
        code: "KJMPV-3DQTA-X2WNE-55ZLB".to_string(),
        status,
        failed_attempts: 0,
        max_failed_attempts: 5,
        puks: vec![
            RecoveryPuk {
                index: 1,
                puk_hash: "$argon2id$stub".to_string(),
                status: PukStatus::Used,
                used_at: Some(now),
            },
            RecoveryPuk {
                index: 2,
                puk_hash: "$argon2id$stub".to_string(),
                status: PukStatus::Valid,
                used_at: None,
            },
        ],
        created_at: now,
        status_changed_at: now,
    }
}

#[test]
fn masked_code_reveals_only_last_group() {
    let code = code_with_puks(RecoveryCodeStatus::Active);
    assert_eq!(code.masked_code(), "*****-*****-*****-55ZLB");
}

#[test]
fn invalidate_puks_spares_used_ones() {
    let mut code = code_with_puks(RecoveryCodeStatus::Active);
    code.invalidate_puks();
    assert_eq!(code.puks[0].status, PukStatus::Used);
    assert_eq!(code.puks[1].status, PukStatus::Invalid);
}

#[test]
fn only_revoked_codes_stop_counting_against_the_limit() {
    assert!(code_with_puks(RecoveryCodeStatus::Created).counts_against_limit());
    assert!(code_with_puks(RecoveryCodeStatus::Active).counts_against_limit());
    assert!(code_with_puks(RecoveryCodeStatus::Blocked).counts_against_limit());
    assert!(!code_with_puks(RecoveryCodeStatus::Revoked).counts_against_limit());
}
