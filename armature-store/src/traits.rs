//! Store traits, one per aggregate.
//!
//! Method names carry the aggregate (`get_activation`, not `get`) so a
//! single backend can implement every trait without call-site
//! ambiguity.
//!
//! Locking: the `lock_*` methods hand out a process-wide mutex lease
//! scoped to one entity id. Callers acquire it before the read and
//! release it only after the final update returns, which is what makes
//! the counter lookahead race-free under concurrent requests for the
//! same activation. Read-only paths skip the lease.

use std::sync::Arc;

use armature_model::{
    Activation, ActivationHistoryRecord, ActivationStatus, Application, Operation,
    OperationTemplate, RecoveryCode, RecoveryCodeStatus, RecoveryConfig, SignatureAuditRecord,
    Token,
};
use armature_types::{ActivationId, ApplicationId, OperationId, RecoveryCodeId, TokenId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StorageResult;

/// Persistence for activations and their history ledger.
#[async_trait]
pub trait ActivationStore: Send + Sync {
    async fn create_activation(&self, activation: Activation) -> StorageResult<()>;

    async fn get_activation(&self, id: &ActivationId) -> StorageResult<Option<Activation>>;

    /// Replaces the stored activation. Errors if it does not exist.
    async fn update_activation(&self, activation: &Activation) -> StorageResult<()>;

    /// Finds an activation of the given application by activation code,
    /// restricted to the given statuses.
    async fn find_activation_by_code(
        &self,
        application_id: &ApplicationId,
        activation_code: &str,
        statuses: &[ActivationStatus],
    ) -> StorageResult<Option<Activation>>;

    async fn list_activations_by_user(
        &self,
        user_id: &UserId,
        application_id: Option<&ApplicationId>,
    ) -> StorageResult<Vec<Activation>>;

    /// Activations still provisioning whose validity window has lapsed.
    async fn list_provisioning_expired(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Activation>>;

    /// Appends to the immutable history ledger.
    async fn append_activation_history(
        &self,
        record: ActivationHistoryRecord,
    ) -> StorageResult<()>;

    async fn activation_history(
        &self,
        id: &ActivationId,
    ) -> StorageResult<Vec<ActivationHistoryRecord>>;

    /// Exclusive lease for read-modify-write sequences on one activation.
    fn lock_activation(&self, id: &ActivationId) -> Arc<Mutex<()>>;
}

/// Persistence for applications and their recovery configuration.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn create_application(&self, application: Application) -> StorageResult<()>;

    async fn get_application(&self, id: &ApplicationId) -> StorageResult<Option<Application>>;

    async fn get_application_by_key(
        &self,
        application_key: &str,
    ) -> StorageResult<Option<Application>>;

    async fn get_recovery_config(
        &self,
        application_id: &ApplicationId,
    ) -> StorageResult<Option<RecoveryConfig>>;

    async fn put_recovery_config(&self, config: RecoveryConfig) -> StorageResult<()>;
}

/// Persistence for operation templates. Read-only at request time;
/// writes happen through administration.
#[async_trait]
pub trait OperationTemplateStore: Send + Sync {
    async fn upsert_template(&self, template: OperationTemplate) -> StorageResult<()>;

    async fn get_template_by_name(
        &self,
        name: &str,
    ) -> StorageResult<Option<OperationTemplate>>;
}

/// Persistence for approval operations.
#[async_trait]
pub trait OperationStore: Send + Sync {
    async fn create_operation(&self, operation: Operation) -> StorageResult<()>;

    async fn get_operation(&self, id: &OperationId) -> StorageResult<Option<Operation>>;

    /// Replaces the stored operation. Errors if it does not exist.
    async fn update_operation(&self, operation: &Operation) -> StorageResult<()>;

    async fn list_pending_for_user(
        &self,
        user_id: &UserId,
        application_id: Option<&ApplicationId>,
    ) -> StorageResult<Vec<Operation>>;

    /// Pending operations past their expiration, for the sweep.
    async fn list_pending_expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<Operation>>;

    /// Exclusive lease scoped to one operation id.
    fn lock_operation(&self, id: &OperationId) -> Arc<Mutex<()>>;
}

/// Filter for recovery code lookups.
#[derive(Debug, Clone, Default)]
pub struct RecoveryCodeQuery {
    pub application_id: Option<ApplicationId>,
    pub user_id: Option<UserId>,
    pub activation_id: Option<ActivationId>,
    pub status: Option<RecoveryCodeStatus>,
}

/// Persistence for recovery codes (PUK rows travel with their code).
#[async_trait]
pub trait RecoveryCodeStore: Send + Sync {
    async fn create_recovery_code(&self, code: RecoveryCode) -> StorageResult<()>;

    async fn get_recovery_code(
        &self,
        id: &RecoveryCodeId,
    ) -> StorageResult<Option<RecoveryCode>>;

    /// Replaces the stored code and all its PUK rows atomically.
    async fn update_recovery_code(&self, code: &RecoveryCode) -> StorageResult<()>;

    async fn recovery_code_exists(
        &self,
        application_id: &ApplicationId,
        code: &str,
    ) -> StorageResult<bool>;

    async fn get_recovery_code_by_value(
        &self,
        application_id: &ApplicationId,
        code: &str,
    ) -> StorageResult<Option<RecoveryCode>>;

    async fn query_recovery_codes(
        &self,
        query: &RecoveryCodeQuery,
    ) -> StorageResult<Vec<RecoveryCode>>;

    /// Exclusive lease scoped to one recovery code id.
    fn lock_recovery_code(&self, id: &RecoveryCodeId) -> Arc<Mutex<()>>;
}

/// Persistence for simple authentication tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create_token(&self, token: Token) -> StorageResult<()>;

    async fn get_token(&self, id: &TokenId) -> StorageResult<Option<Token>>;

    /// Removes the token. Returns whether anything was deleted.
    async fn remove_token(&self, id: &TokenId) -> StorageResult<bool>;
}

/// Durable, append-only sink for signature audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: SignatureAuditRecord) -> StorageResult<()>;
}
