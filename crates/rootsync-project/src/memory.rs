use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use rootsync_core::{
    ChangeCause, ExecutionMode, LibraryDependency, LibraryHandle, LibraryId, LibraryOp,
    LibraryRoots, LibraryTable, ModuleId, ModuleKind, ModuleView, ProjectModel, Result,
    RootSyncError, RootsChangedEvent, RootsListener, SubscriptionId, WriteLock,
};

use crate::ListenerRegistry;

/// Called after every committed transaction with the module whose table changed.
pub type CommitObserver = Arc<dyn Fn(&ModuleId) + Send + Sync>;

type SharedObserver = Arc<RwLock<Option<CommitObserver>>>;

/// One library of a table, as stored and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: LibraryId,
    pub name: String,
    #[serde(default)]
    pub roots: LibraryRoots,
}

/// Project model held entirely in memory.
///
/// Notifications are delivered synchronously on the thread that caused them,
/// including those fired from inside [`LibraryTable::apply`].
pub struct InMemoryProject {
    name: String,
    mode: ExecutionMode,
    modules: RwLock<Vec<Arc<InMemoryModule>>>,
    write_lock: Arc<WriteLock>,
    events: Arc<ListenerRegistry>,
    index_ready: watch::Sender<bool>,
    disposed: AtomicBool,
    observer: SharedObserver,
}

impl InMemoryProject {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_mode(name, ExecutionMode::Production)
    }

    pub fn for_tests(name: impl Into<String>) -> Arc<Self> {
        Self::with_mode(name, ExecutionMode::UnitTest)
    }

    pub fn with_mode(name: impl Into<String>, mode: ExecutionMode) -> Arc<Self> {
        let (index_ready, _) = watch::channel(true);
        Arc::new(Self {
            name: name.into(),
            mode,
            modules: RwLock::new(Vec::new()),
            write_lock: Arc::new(WriteLock::new()),
            events: Arc::new(ListenerRegistry::new()),
            index_ready,
            disposed: AtomicBool::new(false),
            observer: Arc::new(RwLock::new(None)),
        })
    }

    /// Add a module, or return the existing one with that name.
    /// Runs inside the write scope, like every other model edit.
    pub fn add_module(
        &self,
        name: &str,
        kind: ModuleKind,
        metadata_target: bool,
    ) -> Arc<InMemoryModule> {
        let _scope = self.write_lock.acquire();
        if let Some(existing) = self.module(name) {
            return existing;
        }
        let id = ModuleId::new(name);
        let module = Arc::new(InMemoryModule::new(
            id.clone(),
            kind,
            metadata_target,
            self.write_lock.clone(),
            self.events.clone(),
            self.observer.clone(),
        ));
        self.modules.write().push(module.clone());
        debug!("module {} added to {}", id, self.name);
        self.events
            .notify(&RootsChangedEvent::for_module(id, ChangeCause::ModuleAdded));
        module
    }

    pub fn module(&self, name: &str) -> Option<Arc<InMemoryModule>> {
        self.modules
            .read()
            .iter()
            .find(|m| m.id.as_str() == name)
            .cloned()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules
            .read()
            .iter()
            .map(|m| m.id.as_str().to_string())
            .collect()
    }

    /// Detach and dispose a module.
    pub fn remove_module(&self, name: &str) -> Option<Arc<InMemoryModule>> {
        let _scope = self.write_lock.acquire();
        let removed = {
            let mut modules = self.modules.write();
            let idx = modules.iter().position(|m| m.id.as_str() == name)?;
            modules.remove(idx)
        };
        removed.dispose();
        self.events.notify(&RootsChangedEvent::for_module(
            removed.id.clone(),
            ChangeCause::ModuleRemoved,
        ));
        Some(removed)
    }

    pub fn set_index_ready(&self, ready: bool) {
        self.index_ready.send_replace(ready);
    }

    pub fn is_index_ready(&self) -> bool {
        *self.index_ready.borrow()
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        for module in self.modules.read().iter() {
            module.dispose();
        }
        info!("project {} disposed", self.name);
    }

    pub fn fire(&self, event: RootsChangedEvent) {
        self.events.notify(&event);
    }

    pub fn listener_count(&self) -> usize {
        self.events.len()
    }

    pub fn set_commit_observer(&self, observer: CommitObserver) {
        *self.observer.write() = Some(observer);
    }

    pub fn in_memory_modules(&self) -> Vec<Arc<InMemoryModule>> {
        self.modules.read().clone()
    }
}

impl ProjectModel for InMemoryProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn modules(&self) -> Vec<Arc<dyn ModuleView>> {
        self.modules
            .read()
            .iter()
            .map(|m| m.clone() as Arc<dyn ModuleView>)
            .collect()
    }

    fn index_ready(&self) -> watch::Receiver<bool> {
        self.index_ready.subscribe()
    }

    fn subscribe(&self, listener: Arc<dyn RootsListener>) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }

    fn write_lock(&self) -> Arc<WriteLock> {
        self.write_lock.clone()
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }
}

#[derive(Debug, Clone)]
struct ModuleState {
    kind: ModuleKind,
    metadata_target: bool,
    dependencies: Vec<LibraryDependency>,
}

/// Module of an [`InMemoryProject`].
///
/// Setters take the project's write scope around the edit and its
/// notification, so they never interleave with a library commit.
pub struct InMemoryModule {
    id: ModuleId,
    write_lock: Arc<WriteLock>,
    state: RwLock<ModuleState>,
    disposed: Arc<AtomicBool>,
    table: Arc<InMemoryLibraryTable>,
    events: Arc<ListenerRegistry>,
}

impl InMemoryModule {
    fn new(
        id: ModuleId,
        kind: ModuleKind,
        metadata_target: bool,
        write_lock: Arc<WriteLock>,
        events: Arc<ListenerRegistry>,
        observer: SharedObserver,
    ) -> Self {
        let disposed = Arc::new(AtomicBool::new(false));
        let table = Arc::new(InMemoryLibraryTable {
            module: id.clone(),
            libraries: RwLock::new(Vec::new()),
            write_lock: write_lock.clone(),
            disposed: disposed.clone(),
            events: events.clone(),
            commits: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            observer,
        });
        Self {
            id,
            write_lock,
            state: RwLock::new(ModuleState {
                kind,
                metadata_target,
                dependencies: Vec::new(),
            }),
            disposed,
            table,
            events,
        }
    }

    pub fn id_ref(&self) -> &ModuleId {
        &self.id
    }

    pub fn table(&self) -> &Arc<InMemoryLibraryTable> {
        &self.table
    }

    pub fn set_dependencies(&self, dependencies: Vec<LibraryDependency>) {
        self.edit(|state| state.dependencies = dependencies);
    }

    pub fn add_dependency(&self, dependency: LibraryDependency) {
        self.edit(|state| state.dependencies.push(dependency));
    }

    pub fn remove_dependency(&self, name: &str) -> bool {
        let _scope = self.write_lock.acquire();
        let removed = {
            let mut state = self.state.write();
            let before = state.dependencies.len();
            state.dependencies.retain(|d| d.name != name);
            state.dependencies.len() != before
        };
        if removed {
            self.changed();
        }
        removed
    }

    pub fn set_metadata_target(&self, metadata_target: bool) {
        self.edit(|state| state.metadata_target = metadata_target);
    }

    pub fn set_kind(&self, kind: ModuleKind) {
        self.edit(|state| state.kind = kind);
    }

    /// Replace kind, target flag and dependencies without notifying.
    pub fn replace_quietly(
        &self,
        kind: ModuleKind,
        metadata_target: bool,
        dependencies: Vec<LibraryDependency>,
    ) {
        let mut state = self.state.write();
        state.kind = kind;
        state.metadata_target = metadata_target;
        state.dependencies = dependencies;
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn edit(&self, f: impl FnOnce(&mut ModuleState)) {
        let _scope = self.write_lock.acquire();
        f(&mut *self.state.write());
        self.changed();
    }

    fn changed(&self) {
        self.events.notify(&RootsChangedEvent::for_module(
            self.id.clone(),
            ChangeCause::Dependencies,
        ));
    }
}

impl ModuleView for InMemoryModule {
    fn id(&self) -> ModuleId {
        self.id.clone()
    }

    fn kind(&self) -> ModuleKind {
        self.state.read().kind.clone()
    }

    fn targets_metadata_format(&self) -> bool {
        self.state.read().metadata_target
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn library_dependencies(&self) -> Vec<LibraryDependency> {
        self.state.read().dependencies.clone()
    }

    fn library_table(&self) -> Arc<dyn LibraryTable> {
        self.table.clone()
    }
}

/// Library table of one in-memory module.
///
/// `apply` validates the whole op list against a copy before swapping it in,
/// so a rejected transaction leaves the table untouched.
pub struct InMemoryLibraryTable {
    module: ModuleId,
    libraries: RwLock<Vec<LibraryEntry>>,
    write_lock: Arc<WriteLock>,
    disposed: Arc<AtomicBool>,
    events: Arc<ListenerRegistry>,
    commits: AtomicUsize,
    fail_next: Mutex<Option<String>>,
    observer: SharedObserver,
}

impl InMemoryLibraryTable {
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Add a library the way a user would, outside any reconciliation.
    pub fn insert_user_library(&self, name: &str, roots: LibraryRoots) -> LibraryId {
        let id = LibraryId::new_v4();
        self.libraries.write().push(LibraryEntry {
            id,
            name: name.to_string(),
            roots,
        });
        id
    }

    pub fn libraries_snapshot(&self) -> Vec<LibraryEntry> {
        self.libraries.read().clone()
    }

    /// Roots of the first library whose name starts with `prefix`.
    pub fn managed_roots(&self, prefix: &str) -> Option<LibraryRoots> {
        self.libraries
            .read()
            .iter()
            .find(|lib| lib.name.starts_with(prefix))
            .map(|lib| lib.roots.clone())
    }

    /// Replace the table contents, e.g. from persisted state. Does not notify.
    pub fn restore(&self, entries: Vec<LibraryEntry>) {
        *self.libraries.write() = entries;
    }

    /// Make the next `apply` fail with a transaction error.
    pub fn fail_next_commit(&self, reason: &str) {
        *self.fail_next.lock() = Some(reason.to_string());
    }

    fn apply_op(libraries: &mut Vec<LibraryEntry>, op: LibraryOp) -> Result<()> {
        match op {
            LibraryOp::CreateLibrary { id, name } => {
                if libraries.iter().any(|l| l.id == id) {
                    return Err(RootSyncError::DuplicateLibrary(id));
                }
                libraries.push(LibraryEntry {
                    id,
                    name,
                    roots: LibraryRoots::default(),
                });
            }
            LibraryOp::RemoveLibrary { id } => {
                let idx = libraries
                    .iter()
                    .position(|l| l.id == id)
                    .ok_or(RootSyncError::LibraryNotFound(id))?;
                libraries.remove(idx);
            }
            LibraryOp::AddRoot { id, kind, url } => {
                let lib = libraries
                    .iter_mut()
                    .find(|l| l.id == id)
                    .ok_or(RootSyncError::LibraryNotFound(id))?;
                lib.roots.get_mut(kind).insert(url);
            }
            LibraryOp::RemoveRoot { id, kind, url } => {
                let lib = libraries
                    .iter_mut()
                    .find(|l| l.id == id)
                    .ok_or(RootSyncError::LibraryNotFound(id))?;
                if !lib.roots.get_mut(kind).remove(&url) {
                    return Err(RootSyncError::Transaction(format!(
                        "root {} is not part of library {}",
                        url, id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl LibraryTable for InMemoryLibraryTable {
    fn libraries(&self) -> Vec<LibraryHandle> {
        self.libraries
            .read()
            .iter()
            .map(|l| LibraryHandle {
                id: l.id,
                name: l.name.clone(),
            })
            .collect()
    }

    fn roots(&self, id: LibraryId) -> Option<LibraryRoots> {
        self.libraries
            .read()
            .iter()
            .find(|l| l.id == id)
            .map(|l| l.roots.clone())
    }

    fn apply(&self, ops: Vec<LibraryOp>) -> Result<()> {
        if !self.write_lock.is_held_by_current_thread() {
            error!("library table of {} mutated outside the write scope", self.module);
            return Err(RootSyncError::MutationOutsideWriteScope(format!(
                "apply to library table of {}",
                self.module
            )));
        }
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RootSyncError::ModuleDisposed(self.module.clone()));
        }
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(RootSyncError::Transaction(reason));
        }

        {
            let mut libraries = self.libraries.write();
            let mut next = libraries.clone();
            for op in ops {
                Self::apply_op(&mut next, op)?;
            }
            *libraries = next;
        }
        self.commits.fetch_add(1, Ordering::SeqCst);

        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer(&self.module);
        }
        self.events.notify(&RootsChangedEvent::for_module(
            self.module.clone(),
            ChangeCause::LibraryTable,
        ));
        Ok(())
    }
}
