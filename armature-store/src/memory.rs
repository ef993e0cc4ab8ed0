//! In-memory store implementation.
//!
//! Backs the test suites and small embedded deployments. All maps live
//! behind `tokio::sync::RwLock`; entity lock leases are plain
//! `Arc<tokio::sync::Mutex<()>>` handed out from a registry so that two
//! callers asking for the same id always receive the same mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use armature_model::{
    Activation, ActivationHistoryRecord, ActivationStatus, Application, Operation,
    OperationStatus, OperationTemplate, RecoveryCode, RecoveryConfig, SignatureAuditRecord,
    Token,
};
use armature_types::{ActivationId, ApplicationId, OperationId, RecoveryCodeId, TokenId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ActivationStore, ApplicationStore, AuditSink, OperationStore, OperationTemplateStore,
    RecoveryCodeQuery, RecoveryCodeStore, TokenStore,
};

/// Lease registry: same id, same mutex, for the lifetime of the store.
#[derive(Default)]
struct LockRegistry<K> {
    locks: StdMutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: std::hash::Hash + Eq + Clone> LockRegistry<K> {
    fn lease(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock registry poisoned");
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Complete in-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    activations: RwLock<HashMap<ActivationId, Activation>>,
    history: RwLock<Vec<ActivationHistoryRecord>>,
    applications: RwLock<HashMap<ApplicationId, Application>>,
    recovery_configs: RwLock<HashMap<ApplicationId, RecoveryConfig>>,
    operations: RwLock<HashMap<OperationId, Operation>>,
    templates: RwLock<HashMap<String, OperationTemplate>>,
    recovery_codes: RwLock<HashMap<RecoveryCodeId, RecoveryCode>>,
    tokens: RwLock<HashMap<TokenId, Token>>,
    audit: RwLock<Vec<SignatureAuditRecord>>,
    activation_locks: LockRegistry<ActivationId>,
    operation_locks: LockRegistry<OperationId>,
    recovery_locks: LockRegistry<RecoveryCodeId>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all audit records, oldest first. Test observability.
    pub async fn audit_records(&self) -> Vec<SignatureAuditRecord> {
        self.audit.read().await.clone()
    }
}

#[async_trait]
impl ActivationStore for MemoryStore {
    async fn create_activation(&self, activation: Activation) -> StorageResult<()> {
        let mut map = self.activations.write().await;
        if map.contains_key(&activation.id) {
            return Err(StorageError::Conflict(activation.id.to_string()));
        }
        map.insert(activation.id, activation);
        Ok(())
    }

    async fn get_activation(&self, id: &ActivationId) -> StorageResult<Option<Activation>> {
        Ok(self.activations.read().await.get(id).cloned())
    }

    async fn update_activation(&self, activation: &Activation) -> StorageResult<()> {
        let mut map = self.activations.write().await;
        if !map.contains_key(&activation.id) {
            return Err(StorageError::NotFound(activation.id.to_string()));
        }
        map.insert(activation.id, activation.clone());
        Ok(())
    }

    async fn find_activation_by_code(
        &self,
        application_id: &ApplicationId,
        activation_code: &str,
        statuses: &[ActivationStatus],
    ) -> StorageResult<Option<Activation>> {
        Ok(self
            .activations
            .read()
            .await
            .values()
            .find(|a| {
                a.application_id == *application_id
                    && a.activation_code == activation_code
                    && statuses.contains(&a.status)
            })
            .cloned())
    }

    async fn list_activations_by_user(
        &self,
        user_id: &UserId,
        application_id: Option<&ApplicationId>,
    ) -> StorageResult<Vec<Activation>> {
        Ok(self
            .activations
            .read()
            .await
            .values()
            .filter(|a| {
                a.user_id == *user_id
                    && application_id.is_none_or(|app| a.application_id == *app)
            })
            .cloned()
            .collect())
    }

    async fn list_provisioning_expired(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Activation>> {
        Ok(self
            .activations
            .read()
            .await
            .values()
            .filter(|a| a.provisioning_expired(now))
            .cloned()
            .collect())
    }

    async fn append_activation_history(
        &self,
        record: ActivationHistoryRecord,
    ) -> StorageResult<()> {
        self.history.write().await.push(record);
        Ok(())
    }

    async fn activation_history(
        &self,
        id: &ActivationId,
    ) -> StorageResult<Vec<ActivationHistoryRecord>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .filter(|r| r.activation_id == *id)
            .cloned()
            .collect())
    }

    fn lock_activation(&self, id: &ActivationId) -> Arc<Mutex<()>> {
        self.activation_locks.lease(id)
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn create_application(&self, application: Application) -> StorageResult<()> {
        let mut map = self.applications.write().await;
        if map.contains_key(&application.id) {
            return Err(StorageError::Conflict(application.id.to_string()));
        }
        map.insert(application.id, application);
        Ok(())
    }

    async fn get_application(&self, id: &ApplicationId) -> StorageResult<Option<Application>> {
        Ok(self.applications.read().await.get(id).cloned())
    }

    async fn get_application_by_key(
        &self,
        application_key: &str,
    ) -> StorageResult<Option<Application>> {
        Ok(self
            .applications
            .read()
            .await
            .values()
            .find(|a| a.application_key == application_key)
            .cloned())
    }

    async fn get_recovery_config(
        &self,
        application_id: &ApplicationId,
    ) -> StorageResult<Option<RecoveryConfig>> {
        Ok(self.recovery_configs.read().await.get(application_id).cloned())
    }

    async fn put_recovery_config(&self, config: RecoveryConfig) -> StorageResult<()> {
        self.recovery_configs
            .write()
            .await
            .insert(config.application_id, config);
        Ok(())
    }
}

#[async_trait]
impl OperationTemplateStore for MemoryStore {
    async fn upsert_template(&self, template: OperationTemplate) -> StorageResult<()> {
        self.templates
            .write()
            .await
            .insert(template.name.clone(), template);
        Ok(())
    }

    async fn get_template_by_name(
        &self,
        name: &str,
    ) -> StorageResult<Option<OperationTemplate>> {
        Ok(self.templates.read().await.get(name).cloned())
    }
}

#[async_trait]
impl OperationStore for MemoryStore {
    async fn create_operation(&self, operation: Operation) -> StorageResult<()> {
        let mut map = self.operations.write().await;
        if map.contains_key(&operation.id) {
            return Err(StorageError::Conflict(operation.id.to_string()));
        }
        map.insert(operation.id, operation);
        Ok(())
    }

    async fn get_operation(&self, id: &OperationId) -> StorageResult<Option<Operation>> {
        Ok(self.operations.read().await.get(id).cloned())
    }

    async fn update_operation(&self, operation: &Operation) -> StorageResult<()> {
        let mut map = self.operations.write().await;
        if !map.contains_key(&operation.id) {
            return Err(StorageError::NotFound(operation.id.to_string()));
        }
        map.insert(operation.id, operation.clone());
        Ok(())
    }

    async fn list_pending_for_user(
        &self,
        user_id: &UserId,
        application_id: Option<&ApplicationId>,
    ) -> StorageResult<Vec<Operation>> {
        Ok(self
            .operations
            .read()
            .await
            .values()
            .filter(|o| {
                o.status == OperationStatus::Pending
                    && o.user_id == *user_id
                    && application_id.is_none_or(|app| o.application_ids.contains(app))
            })
            .cloned()
            .collect())
    }

    async fn list_pending_expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<Operation>> {
        Ok(self
            .operations
            .read()
            .await
            .values()
            .filter(|o| o.is_expired(now))
            .cloned()
            .collect())
    }

    fn lock_operation(&self, id: &OperationId) -> Arc<Mutex<()>> {
        self.operation_locks.lease(id)
    }
}

#[async_trait]
impl RecoveryCodeStore for MemoryStore {
    async fn create_recovery_code(&self, code: RecoveryCode) -> StorageResult<()> {
        let mut map = self.recovery_codes.write().await;
        if map.contains_key(&code.id) {
            return Err(StorageError::Conflict(code.id.to_string()));
        }
        map.insert(code.id, code);
        Ok(())
    }

    async fn get_recovery_code(
        &self,
        id: &RecoveryCodeId,
    ) -> StorageResult<Option<RecoveryCode>> {
        Ok(self.recovery_codes.read().await.get(id).cloned())
    }

    async fn update_recovery_code(&self, code: &RecoveryCode) -> StorageResult<()> {
        let mut map = self.recovery_codes.write().await;
        if !map.contains_key(&code.id) {
            return Err(StorageError::NotFound(code.id.to_string()));
        }
        map.insert(code.id, code.clone());
        Ok(())
    }

    async fn recovery_code_exists(
        &self,
        application_id: &ApplicationId,
        code: &str,
    ) -> StorageResult<bool> {
        Ok(self
            .recovery_codes
            .read()
            .await
            .values()
            .any(|c| c.application_id == *application_id && c.code == code))
    }

    async fn get_recovery_code_by_value(
        &self,
        application_id: &ApplicationId,
        code: &str,
    ) -> StorageResult<Option<RecoveryCode>> {
        Ok(self
            .recovery_codes
            .read()
            .await
            .values()
            .find(|c| c.application_id == *application_id && c.code == code)
            .cloned())
    }

    async fn query_recovery_codes(
        &self,
        query: &RecoveryCodeQuery,
    ) -> StorageResult<Vec<RecoveryCode>> {
        Ok(self
            .recovery_codes
            .read()
            .await
            .values()
            .filter(|c| {
                query.application_id.is_none_or(|app| c.application_id == app)
                    && query.user_id.as_ref().is_none_or(|u| c.user_id == *u)
                    && query
                        .activation_id
                        .is_none_or(|act| c.activation_id == Some(act))
                    && query.status.is_none_or(|s| c.status == s)
            })
            .cloned()
            .collect())
    }

    fn lock_recovery_code(&self, id: &RecoveryCodeId) -> Arc<Mutex<()>> {
        self.recovery_locks.lease(id)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create_token(&self, token: Token) -> StorageResult<()> {
        let mut map = self.tokens.write().await;
        if map.contains_key(&token.id) {
            return Err(StorageError::Conflict(token.id.to_string()));
        }
        map.insert(token.id, token);
        Ok(())
    }

    async fn get_token(&self, id: &TokenId) -> StorageResult<Option<Token>> {
        Ok(self.tokens.read().await.get(id).cloned())
    }

    async fn remove_token(&self, id: &TokenId) -> StorageResult<bool> {
        Ok(self.tokens.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, record: SignatureAuditRecord) -> StorageResult<()> {
        self.audit.write().await.push(record);
        Ok(())
    }
}
