//! The Armature protocol engine.
//!
//! Binds a device to a user account through an encrypted provisioning
//! exchange, then authenticates every subsequent request with
//! counter-based multi-factor signatures. The engine owns all protocol
//! state machines and security invariants; persistence, transport and
//! low-level crypto live behind the seams in `armature-store` and
//! `armature-crypto`.
//!
//! Construction is explicit composition: [`Engine::new`] builds each
//! manager with the stores and keys it needs. No manager holds a
//! reference back to the engine.

mod activation;
mod codes;
mod config;
mod engine;
mod error;
mod events;
mod keys;
mod operation;
mod recovery;
mod scheme;
mod signature;
mod token;

pub use activation::{
    verify_activation_code_signature, ActivationManager, ActivationStatusResponse,
    DeviceProvisioningPayload, InitActivationRequest, InitActivationResponse,
    PrepareActivationRequest, PrepareActivationResponse, ServerProvisioningPayload,
};
pub use codes::{generate_activation_code, validate_activation_code, ACTIVATION_CODE_LENGTH};
pub use config::ProtocolConfig;
pub use engine::{Engine, Stores};
pub use error::{ProtocolError, ProtocolResult};
pub use events::{spawn_logging_dispatcher, CallbackMessage, CallbackPayload, CallbackSender};
pub use operation::{
    ApprovalOutcome, ApproveOperationRequest, CreateOperationRequest, OperationManager,
    RejectOutcome,
};
pub use recovery::{
    derive_recovery_credentials, ConfirmRecoveryCodeResponse, ConfirmRecoveryPayload,
    CreateRecoveryCodeRequest, CreateRecoveryCodeResponse, RecoveryCodeSummary, RecoveryManager,
};
pub use signature::{
    SignatureEngine, SignatureRequest, SignatureVerification, VaultUnlockResult,
};
pub use token::{
    CreateTokenRequest, CreateTokenResponse, TokenIssuePayload, TokenManager, TokenValidation,
    TokenValidationRequest,
};
