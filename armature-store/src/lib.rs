//! Persistence contracts for the Armature protocol core.
//!
//! The engine depends on `Arc<dyn …Store>` seams — it never sees how
//! entities are stored or queried. Each aggregate gets its own trait
//! with exactly the lookups the protocol needs, plus an exclusive-lock
//! lease used to serialize read-modify-write sequences per entity.
//!
//! [`MemoryStore`] is a complete in-process implementation backing the
//! test suites and small embedded deployments.

mod error;
mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use traits::{
    ActivationStore, ApplicationStore, AuditSink, OperationStore, OperationTemplateStore,
    RecoveryCodeQuery, RecoveryCodeStore, TokenStore,
};
