//! Operation approval workflow.
//!
//! Template-driven out-of-band approvals. The rendered `data` string is
//! fixed at creation; approval demands a byte-exact match plus user,
//! application and factor checks. Expiry is enforced lazily on every
//! access and by a periodic single-flight sweep.

use armature_model::{Operation, OperationStatus};
use armature_store::{ApplicationStore, OperationStore, OperationTemplateStore};
use armature_types::{ApplicationId, OperationId, SignatureFactor, UserId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{CallbackMessage, CallbackPayload, CallbackSender};

/// Request to create an operation from a template.
#[derive(Debug, Clone)]
pub struct CreateOperationRequest {
    pub user_id: UserId,
    pub application_ids: Vec<ApplicationId>,
    pub template_name: String,
    pub parameters: HashMap<String, String>,
    pub external_id: Option<String>,
    pub risk_flags: Option<String>,
}

/// Approval attempt inputs.
#[derive(Debug, Clone)]
pub struct ApproveOperationRequest {
    pub operation_id: OperationId,
    pub user_id: UserId,
    pub application_id: ApplicationId,
    /// Must equal the stored rendered data byte for byte.
    pub data: String,
    pub factor: SignatureFactor,
}

/// Outcome of an approval attempt. `ApprovalFailed` leaves the
/// operation pending; `OperationFailed` is terminal.
#[derive(Debug, Clone)]
pub enum ApprovalOutcome {
    Approved(Operation),
    ApprovalFailed {
        operation: Operation,
        remaining_attempts: u32,
    },
    OperationFailed(Operation),
}

/// Outcome of a reject call. A user/application mismatch leaves the
/// operation untouched.
#[derive(Debug, Clone)]
pub enum RejectOutcome {
    Rejected(Operation),
    RejectFailed(Operation),
}

/// Manages approval operations.
#[derive(Clone)]
pub struct OperationManager {
    config: ProtocolConfig,
    operations: Arc<dyn OperationStore>,
    templates: Arc<dyn OperationTemplateStore>,
    applications: Arc<dyn ApplicationStore>,
    callbacks: CallbackSender,
    sweep_running: Arc<AtomicBool>,
}

impl OperationManager {
    pub(crate) fn new(
        config: ProtocolConfig,
        operations: Arc<dyn OperationStore>,
        templates: Arc<dyn OperationTemplateStore>,
        applications: Arc<dyn ApplicationStore>,
        callbacks: CallbackSender,
    ) -> Self {
        Self {
            config,
            operations,
            templates,
            applications,
            callbacks,
            sweep_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a PENDING operation from a named template.
    pub async fn create_operation(
        &self,
        request: CreateOperationRequest,
    ) -> ProtocolResult<Operation> {
        let template = self
            .templates
            .get_template_by_name(&request.template_name)
            .await?
            .ok_or_else(|| {
                ProtocolError::NotFound(format!("operation template {}", request.template_name))
            })?;

        if request.application_ids.is_empty() {
            return Err(ProtocolError::InvalidInput(
                "operation needs at least one application".to_string(),
            ));
        }
        for application_id in &request.application_ids {
            if self.applications.get_application(application_id).await?.is_none() {
                return Err(ProtocolError::NotFound("application".to_string()));
            }
        }

        let id = self.generate_operation_id().await?;
        let now = Utc::now();
        let operation = Operation {
            id,
            user_id: request.user_id,
            application_ids: request.application_ids,
            external_id: request.external_id,
            operation_type: template.operation_type.clone(),
            data: template.render_data(&request.parameters),
            parameters: request.parameters,
            status: OperationStatus::Pending,
            allowed_factors: template.allowed_factors.clone(),
            failure_count: 0,
            max_failure_count: template.max_failure_count,
            risk_flags: request.risk_flags,
            created_at: now,
            expires_at: now + Duration::seconds(template.expiration_secs),
            finalized_at: None,
        };

        self.operations.create_operation(operation.clone()).await?;
        self.notify_status(&operation);
        info!(operation_id = %operation.id, "operation created");
        Ok(operation)
    }

    /// Loads an operation, applying the lazy expiry check.
    pub async fn get_operation(&self, id: &OperationId) -> ProtocolResult<Operation> {
        let lease = self.operations.lock_operation(id);
        let _guard = lease.lock().await;
        let mut operation = self.load(id).await?;
        self.expire_if_due(&mut operation, Utc::now()).await?;
        Ok(operation)
    }

    /// Attempts approval. All of user, application, data and factor
    /// must match; any mismatch charges the failure budget.
    pub async fn attempt_approve(
        &self,
        request: ApproveOperationRequest,
    ) -> ProtocolResult<ApprovalOutcome> {
        let lease = self.operations.lock_operation(&request.operation_id);
        let _guard = lease.lock().await;

        let mut operation = self.load(&request.operation_id).await?;
        let now = Utc::now();
        self.expire_if_due(&mut operation, now).await?;
        Self::require_pending(&operation)?;

        let matches = operation.user_id == request.user_id
            && operation.application_ids.contains(&request.application_id)
            && operation.data == request.data
            && operation.allows_factor(request.factor);

        if matches {
            operation.finalize(OperationStatus::Approved, now);
            self.operations.update_operation(&operation).await?;
            self.notify_status(&operation);
            info!(operation_id = %operation.id, "operation approved");
            return Ok(ApprovalOutcome::Approved(operation));
        }

        self.charge_failure(operation, now).await
    }

    /// Rejects a pending operation. Only user and application are
    /// checked; a mismatch changes nothing.
    pub async fn reject(
        &self,
        operation_id: &OperationId,
        user_id: &UserId,
        application_id: &ApplicationId,
    ) -> ProtocolResult<RejectOutcome> {
        let lease = self.operations.lock_operation(operation_id);
        let _guard = lease.lock().await;

        let mut operation = self.load(operation_id).await?;
        let now = Utc::now();
        self.expire_if_due(&mut operation, now).await?;
        Self::require_pending(&operation)?;

        if operation.user_id != *user_id || !operation.application_ids.contains(application_id) {
            return Ok(RejectOutcome::RejectFailed(operation));
        }

        operation.finalize(OperationStatus::Rejected, now);
        self.operations.update_operation(&operation).await?;
        self.notify_status(&operation);
        info!(operation_id = %operation.id, "operation rejected");
        Ok(RejectOutcome::Rejected(operation))
    }

    /// Unconditional failure-count increment, used when an upstream
    /// factor check already failed before reaching this workflow.
    pub async fn fail_approval(&self, operation_id: &OperationId) -> ProtocolResult<ApprovalOutcome> {
        let lease = self.operations.lock_operation(operation_id);
        let _guard = lease.lock().await;

        let mut operation = self.load(operation_id).await?;
        let now = Utc::now();
        self.expire_if_due(&mut operation, now).await?;
        Self::require_pending(&operation)?;

        self.charge_failure(operation, now).await
    }

    /// PENDING → CANCELED.
    pub async fn cancel(&self, operation_id: &OperationId) -> ProtocolResult<Operation> {
        let lease = self.operations.lock_operation(operation_id);
        let _guard = lease.lock().await;

        let mut operation = self.load(operation_id).await?;
        let now = Utc::now();
        self.expire_if_due(&mut operation, now).await?;
        Self::require_pending(&operation)?;

        operation.finalize(OperationStatus::Canceled, now);
        self.operations.update_operation(&operation).await?;
        self.notify_status(&operation);
        Ok(operation)
    }

    /// Pending operations of one user, with lazy expiry applied.
    pub async fn list_pending_operations(
        &self,
        user_id: &UserId,
        application_id: Option<&ApplicationId>,
    ) -> ProtocolResult<Vec<Operation>> {
        let now = Utc::now();
        let mut pending = Vec::new();
        for operation in self
            .operations
            .list_pending_for_user(user_id, application_id)
            .await?
        {
            if operation.is_expired(now) {
                let lease = self.operations.lock_operation(&operation.id);
                let _guard = lease.lock().await;
                let mut operation = self.load(&operation.id).await?;
                self.expire_if_due(&mut operation, now).await?;
            } else {
                pending.push(operation);
            }
        }
        Ok(pending)
    }

    /// Sweeps all pending operations past their expiration. Guarded so
    /// only one sweep runs at a time; concurrent calls return 0.
    pub async fn expire_pending_operations(&self) -> ProtocolResult<usize> {
        if self
            .sweep_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(0);
        }

        let result = self.expire_pending_inner().await;
        self.sweep_running.store(false, Ordering::Release);
        result
    }

    /// Spawns the periodic expiration sweep.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let period = std::time::Duration::from_secs(manager.config.operation_sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match manager.expire_pending_operations().await {
                    Ok(0) => {}
                    Ok(expired) => info!(expired, "operation sweep finished"),
                    Err(err) => warn!(%err, "operation sweep failed"),
                }
            }
        })
    }

    async fn expire_pending_inner(&self) -> ProtocolResult<usize> {
        let now = Utc::now();
        let mut expired = 0;
        for candidate in self.operations.list_pending_expired(now).await? {
            let lease = self.operations.lock_operation(&candidate.id);
            let _guard = lease.lock().await;
            let mut operation = self.load(&candidate.id).await?;
            if self.expire_if_due(&mut operation, now).await? {
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Forces a pending operation past its window to EXPIRED. Returns
    /// whether a transition happened. Caller holds the lease.
    async fn expire_if_due(
        &self,
        operation: &mut Operation,
        now: DateTime<Utc>,
    ) -> ProtocolResult<bool> {
        if !operation.is_expired(now) {
            return Ok(false);
        }
        operation.finalize(OperationStatus::Expired, now);
        self.operations.update_operation(operation).await?;
        self.notify_status(operation);
        Ok(true)
    }

    async fn charge_failure(
        &self,
        mut operation: Operation,
        now: DateTime<Utc>,
    ) -> ProtocolResult<ApprovalOutcome> {
        operation.failure_count += 1;
        if operation.failure_count >= operation.max_failure_count {
            operation.finalize(OperationStatus::Failed, now);
            self.operations.update_operation(&operation).await?;
            self.notify_status(&operation);
            info!(operation_id = %operation.id, "operation failed: approval budget exhausted");
            return Ok(ApprovalOutcome::OperationFailed(operation));
        }

        self.operations.update_operation(&operation).await?;
        let remaining_attempts = operation.max_failure_count - operation.failure_count;
        Ok(ApprovalOutcome::ApprovalFailed {
            operation,
            remaining_attempts,
        })
    }

    fn require_pending(operation: &Operation) -> ProtocolResult<()> {
        if operation.status != OperationStatus::Pending {
            return Err(ProtocolError::InvalidState(format!(
                "operation is {:?}",
                operation.status
            )));
        }
        Ok(())
    }

    fn notify_status(&self, operation: &Operation) {
        for application_id in &operation.application_ids {
            self.callbacks.notify(CallbackMessage {
                application_id: *application_id,
                payload: CallbackPayload::OperationStatusChanged {
                    operation_id: operation.id,
                    user_id: operation.user_id.clone(),
                    status: operation.status,
                },
            });
        }
    }

    async fn load(&self, id: &OperationId) -> ProtocolResult<Operation> {
        self.operations
            .get_operation(id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound("operation".to_string()))
    }

    async fn generate_operation_id(&self) -> ProtocolResult<OperationId> {
        for _ in 0..self.config.id_generation_attempts {
            let id = OperationId::new();
            if self.operations.get_operation(&id).await?.is_none() {
                return Ok(id);
            }
        }
        Err(ProtocolError::ExhaustedRetries("operation id"))
    }
}
