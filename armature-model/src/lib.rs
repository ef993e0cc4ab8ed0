//! Persistent aggregates of the Armature protocol core.
//!
//! Each module defines one aggregate and its state machine: plain serde
//! structs, status enums with transition predicates, and the small
//! amount of behavior that belongs to the data itself (template
//! rendering, code masking, budget arithmetic). Anything that needs a
//! store or a key lives in `armature-protocol`.

mod activation;
mod application;
mod audit;
mod operation;
mod recovery;
mod token;

pub use activation::{
    Activation, ActivationHistoryRecord, ActivationStatus, KeyEncryptionMode,
    BLOCKED_REASON_MAX_FAILED_ATTEMPTS, BLOCKED_REASON_NOT_SPECIFIED,
};
pub use application::{Application, RecoveryConfig};
pub use audit::{SignatureAuditNote, SignatureAuditRecord};
pub use operation::{Operation, OperationStatus, OperationTemplate};
pub use recovery::{PukStatus, RecoveryCode, RecoveryPuk, RecoveryCodeStatus};
pub use token::Token;
