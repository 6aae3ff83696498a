use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use crate::{
    ExecutionMode, LibraryDependency, LibraryHandle, LibraryId, LibraryOp, LibraryRoots, ModuleId,
    ModuleKind, Result, RootUrl, RootsChangedEvent, SubscriptionId, WriteLock,
};

/// The project a manager reconciles. Implemented by the host.
pub trait ProjectModel: Send + Sync {
    fn name(&self) -> &str;
    fn is_disposed(&self) -> bool;
    fn modules(&self) -> Vec<Arc<dyn ModuleView>>;
    /// `true` while the project's index is usable; pending passes wait for it.
    fn index_ready(&self) -> watch::Receiver<bool>;
    fn subscribe(&self, listener: Arc<dyn RootsListener>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
    fn write_lock(&self) -> Arc<WriteLock>;
    fn execution_mode(&self) -> ExecutionMode;
}

pub trait ModuleView: Send + Sync {
    fn id(&self) -> ModuleId;
    fn kind(&self) -> ModuleKind;
    fn targets_metadata_format(&self) -> bool;
    fn is_disposed(&self) -> bool;
    fn library_dependencies(&self) -> Vec<LibraryDependency>;
    fn library_table(&self) -> Arc<dyn LibraryTable>;
}

/// Per-module library storage owned by the project model.
pub trait LibraryTable: Send + Sync {
    fn libraries(&self) -> Vec<LibraryHandle>;
    fn roots(&self, id: LibraryId) -> Option<LibraryRoots>;
    /// Apply all ops or none. Callers must hold the project's write scope.
    fn apply(&self, ops: Vec<LibraryOp>) -> Result<()>;
}

pub trait RootsListener: Send + Sync {
    fn roots_changed(&self, event: &RootsChangedEvent);
}

/// Looks inside dependency artifacts on behalf of the scanner.
pub trait ArtifactInspector: Send + Sync {
    /// Local path behind a declared root, `None` when it no longer exists.
    fn resolve(&self, root: &RootUrl) -> Option<PathBuf>;
    fn carries_metadata(&self, path: &Path) -> bool;
}
