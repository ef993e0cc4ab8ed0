//! Engine composition.
//!
//! The engine is the single place where managers are constructed and
//! wired: it owns the store handles and the key provider and passes
//! narrow pieces of them downward. Managers never reach back up.

use armature_model::Application;
use armature_store::{
    ActivationStore, ApplicationStore, AuditSink, MemoryStore, OperationStore,
    OperationTemplateStore, RecoveryCodeStore, TokenStore,
};
use std::sync::Arc;

use crate::activation::{new_application, ActivationManager};
use crate::config::ProtocolConfig;
use crate::error::ProtocolResult;
use crate::events::CallbackSender;
use crate::keys::KeyProvider;
use crate::operation::OperationManager;
use crate::recovery::RecoveryManager;
use crate::signature::SignatureEngine;
use crate::token::TokenManager;

/// The store handles the engine is built over, one per aggregate.
#[derive(Clone)]
pub struct Stores {
    pub activations: Arc<dyn ActivationStore>,
    pub applications: Arc<dyn ApplicationStore>,
    pub templates: Arc<dyn OperationTemplateStore>,
    pub operations: Arc<dyn OperationStore>,
    pub recovery_codes: Arc<dyn RecoveryCodeStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    /// One shared [`MemoryStore`] playing every role. The second return
    /// value keeps direct access for test observability.
    #[must_use]
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            Self {
                activations: store.clone(),
                applications: store.clone(),
                templates: store.clone(),
                operations: store.clone(),
                recovery_codes: store.clone(),
                tokens: store.clone(),
                audit: store.clone(),
            },
            store,
        )
    }
}

/// The assembled protocol engine.
pub struct Engine {
    pub activations: ActivationManager,
    pub signatures: SignatureEngine,
    pub operations: OperationManager,
    pub recovery: RecoveryManager,
    pub tokens: TokenManager,
    applications: Arc<dyn ApplicationStore>,
}

impl Engine {
    /// Builds the engine. Fails only on configuration errors (e.g. a
    /// malformed master storage key).
    pub fn new(
        config: ProtocolConfig,
        stores: Stores,
        callbacks: CallbackSender,
    ) -> ProtocolResult<Self> {
        let keys = Arc::new(KeyProvider::from_config(&config)?);

        let activations = ActivationManager::new(
            config.clone(),
            stores.activations.clone(),
            stores.applications.clone(),
            keys.clone(),
            callbacks.clone(),
        );
        let signatures = SignatureEngine::new(
            config.clone(),
            stores.activations.clone(),
            stores.applications.clone(),
            stores.audit.clone(),
            keys.clone(),
            callbacks.clone(),
        );
        let operations = OperationManager::new(
            config.clone(),
            stores.operations.clone(),
            stores.templates.clone(),
            stores.applications.clone(),
            callbacks.clone(),
        );
        let recovery = RecoveryManager::new(
            config.clone(),
            stores.recovery_codes.clone(),
            stores.activations.clone(),
            stores.applications.clone(),
            keys.clone(),
            callbacks.clone(),
        );
        let tokens = TokenManager::new(
            config,
            stores.tokens.clone(),
            stores.activations.clone(),
            keys,
        );

        Ok(Self {
            activations,
            signatures,
            operations,
            recovery,
            tokens,
            applications: stores.applications,
        })
    }

    /// Registers a new application with freshly generated key material.
    pub async fn register_application(&self, name: &str) -> ProtocolResult<Application> {
        let application = new_application(name);
        self.applications.create_application(application.clone()).await?;
        Ok(application)
    }
}
