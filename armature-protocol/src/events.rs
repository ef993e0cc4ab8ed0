//! Outbound callback events.
//!
//! Every successful state mutation emits one message describing the
//! change. Emission is fire-and-forget: services push onto an unbounded
//! channel after their store write returns and never wait for, or learn
//! about, delivery. A separate dispatcher task drains the channel;
//! delivery failures are logged there and never reach the caller.

use armature_model::{ActivationStatus, OperationStatus, RecoveryCodeStatus};
use armature_types::{ActivationId, ApplicationId, OperationId, RecoveryCodeId, UserId};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What changed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackPayload {
    ActivationStatusChanged {
        activation_id: ActivationId,
        user_id: UserId,
        status: ActivationStatus,
        reason: Option<String>,
    },
    OperationStatusChanged {
        operation_id: OperationId,
        user_id: UserId,
        status: OperationStatus,
    },
    RecoveryCodeStatusChanged {
        recovery_code_id: RecoveryCodeId,
        user_id: UserId,
        status: RecoveryCodeStatus,
    },
}

/// One callback message addressed to an application's listeners.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackMessage {
    pub application_id: ApplicationId,
    pub payload: CallbackPayload,
}

/// Sending half handed to every manager.
#[derive(Clone)]
pub struct CallbackSender {
    tx: Option<mpsc::UnboundedSender<CallbackMessage>>,
}

impl CallbackSender {
    /// Creates a connected sender/receiver pair.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CallbackMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender that drops every message. For embedders without
    /// callback listeners.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emits a message. Never blocks, never fails the caller.
    pub fn notify(&self, message: CallbackMessage) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(message).is_err() {
            debug!("callback channel closed, dropping notification");
        }
    }
}

/// Spawns a dispatcher that drains the callback channel and logs each
/// message. Real deployments replace this with a delivery worker that
/// posts to registered listener URLs; the contract is the same —
/// failures stay inside the dispatcher.
pub fn spawn_logging_dispatcher(
    mut rx: mpsc::UnboundedReceiver<CallbackMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            info!(
                application_id = %message.application_id,
                payload = ?message.payload,
                "callback notification"
            );
        }
    })
}
