//! Error taxonomy for the task store and namespaced state store.

use thiserror::Error;

/// Errors surfaced by the [`crate::Store`] contract.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid state transition for task {id}: {from} -> {to}")]
    InvalidState { id: String, from: String, to: String },

    #[error("store not found at {0}")]
    StoreNotFound(String),

    #[error("store is corrupt: {0}")]
    StoreCorrupt(String),

    #[error("failed to write store: {0}")]
    StoreWriteFailed(String),

    #[error("timed out acquiring lock after {0:?}")]
    LockTimeout(std::time::Duration),

    #[error("parent task not found: {0}")]
    ParentNotFound(String),

    #[error("dependency not found: {0}")]
    DependencyNotFound(String),
}

impl StoreError {
    /// Classify whether this error looks like a connection/availability
    /// failure (worth falling through to a secondary store) as opposed to a
    /// data-integrity or logic failure (should be surfaced loudly instead).
    pub fn is_connection_class(&self) -> bool {
        matches!(self, StoreError::StoreNotFound(_) | StoreError::StoreWriteFailed(_) | StoreError::LockTimeout(_))
    }
}

/// Errors from the namespaced [`crate::state::StateStore`].
#[derive(Debug, Error)]
pub enum StateError {
    #[error("timed out acquiring namespace lock after {0:?}")]
    LockTimeout(std::time::Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed state file: {0}")]
    Corrupt(String),
}
