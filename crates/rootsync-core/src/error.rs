use thiserror::Error;

use crate::{ConfigError, LibraryId, ModuleId};

#[derive(Error, Debug)]
pub enum RootSyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Library mutation attempted outside the exclusive write scope: {0}")]
    MutationOutsideWriteScope(String),

    #[error("Synchronous reconciliation may only be triggered in unit-test mode")]
    SynchronousOutsideTest,

    #[error("Synchronous reconciliation requires the caller to hold the write scope")]
    WriteScopeNotHeld,

    #[error("Module disposed: {0}")]
    ModuleDisposed(ModuleId),

    #[error("Library not found: {0}")]
    LibraryNotFound(LibraryId),

    #[error("Library already exists: {0}")]
    DuplicateLibrary(LibraryId),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Event gate is closed")]
    GateClosed,
}

impl RootSyncError {
    /// Misuse of the write scope or of synchronous mode. These are never retried.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            RootSyncError::MutationOutsideWriteScope(_)
                | RootSyncError::SynchronousOutsideTest
                | RootSyncError::WriteScopeNotHeld
        )
    }

    /// The module went away while a pass was in flight.
    pub fn is_disposed_race(&self) -> bool {
        matches!(self, RootSyncError::ModuleDisposed(_))
    }
}

pub type Result<T> = std::result::Result<T, RootSyncError>;
