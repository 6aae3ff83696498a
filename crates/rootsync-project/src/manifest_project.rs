use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use rootsync_core::{
    ChangeCause, ExecutionMode, ModuleId, ModuleView, ProjectModel, RootsChangedEvent,
    RootsListener, SubscriptionId, WriteLock,
};

use crate::{InMemoryProject, LibraryState, Manifest, ManifestError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: usize,
}

/// Project backed by a `rootsync.toml` manifest.
///
/// Library tables are restored from `.rootsync/libraries.json` at load and
/// written back after every committed transaction.
pub struct ManifestProject {
    manifest_path: PathBuf,
    root: PathBuf,
    state_path: PathBuf,
    inner: Arc<InMemoryProject>,
    reload_lock: Mutex<()>,
}

impl ManifestProject {
    pub fn load(manifest_path: &Path) -> Result<Arc<Self>, ManifestError> {
        Self::load_with_mode(manifest_path, ExecutionMode::Production)
    }

    pub fn load_with_mode(
        manifest_path: &Path,
        mode: ExecutionMode,
    ) -> Result<Arc<Self>, ManifestError> {
        let manifest_path = fs::canonicalize(manifest_path).map_err(|source| ManifestError::Io {
            path: manifest_path.to_path_buf(),
            source,
        })?;
        let manifest = Manifest::load(&manifest_path)?;
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let state_path = LibraryState::path_for(&root);

        let inner = InMemoryProject::with_mode(manifest.project.name.clone(), mode);
        for section in &manifest.modules {
            let module =
                inner.add_module(&section.name, section.kind.clone(), section.metadata_target);
            module.replace_quietly(
                section.kind.clone(),
                section.metadata_target,
                section.dependencies(&root),
            );
        }

        let state = LibraryState::load(&state_path)?;
        for (name, entries) in state.modules {
            match inner.module(&name) {
                Some(module) => module.table().restore(entries),
                None => debug!("dropping persisted libraries of unknown module {}", name),
            }
        }

        let project = Arc::new(Self {
            manifest_path,
            root,
            state_path,
            inner,
            reload_lock: Mutex::new(()),
        });

        let weak = Arc::downgrade(&project);
        project
            .inner
            .set_commit_observer(Arc::new(move |module: &ModuleId| {
                if let Some(project) = weak.upgrade() {
                    if let Err(e) = project.persist() {
                        warn!("failed to persist libraries after commit in {}: {}", module, e);
                    }
                }
            }));

        info!(
            "loaded project {} with {} modules from {}",
            project.inner.name(),
            manifest.modules.len(),
            project.manifest_path.display()
        );
        Ok(project)
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn inner(&self) -> &Arc<InMemoryProject> {
        &self.inner
    }

    /// Write every module's library table to the state file.
    pub fn persist(&self) -> Result<(), ManifestError> {
        let mut state = LibraryState {
            project: self.inner.name().to_string(),
            ..Default::default()
        };
        for module in self.inner.in_memory_modules() {
            state.modules.insert(
                module.id_ref().as_str().to_string(),
                module.table().libraries_snapshot(),
            );
        }
        state.save(&self.state_path)
    }

    /// Re-read the manifest and update modules in place.
    ///
    /// Modules are updated inside the project's write scope. The index is
    /// reported not ready meanwhile, and a single project-wide notification
    /// follows. A manifest that fails to parse
    /// leaves the project untouched.
    pub fn reload(&self) -> Result<ReloadSummary, ManifestError> {
        let _guard = self.reload_lock.lock();
        let manifest = Manifest::load(&self.manifest_path)?;
        if manifest.project.name != self.inner.name() {
            warn!(
                "manifest renames project {} to {}; keeping the original name",
                self.inner.name(),
                manifest.project.name
            );
        }

        let write_lock = self.inner.write_lock();
        let _scope = write_lock.acquire();
        self.inner.set_index_ready(false);
        let mut summary = ReloadSummary::default();

        let wanted: HashSet<&str> = manifest.modules.iter().map(|m| m.name.as_str()).collect();
        for name in self.inner.module_names() {
            if !wanted.contains(name.as_str()) {
                self.inner.remove_module(&name);
                summary.removed.push(name);
            }
        }

        for section in &manifest.modules {
            let dependencies = section.dependencies(&self.root);
            let module = match self.inner.module(&section.name) {
                Some(module) => {
                    summary.updated += 1;
                    module
                }
                None => {
                    summary.added.push(section.name.clone());
                    self.inner
                        .add_module(&section.name, section.kind.clone(), section.metadata_target)
                }
            };
            module.replace_quietly(section.kind.clone(), section.metadata_target, dependencies);
        }

        self.inner.set_index_ready(true);
        self.inner
            .fire(RootsChangedEvent::project_wide(ChangeCause::Dependencies));
        info!(
            "reloaded {}: {} added, {} removed, {} updated",
            self.manifest_path.display(),
            summary.added.len(),
            summary.removed.len(),
            summary.updated
        );
        Ok(summary)
    }
}

impl ProjectModel for ManifestProject {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    fn modules(&self) -> Vec<Arc<dyn ModuleView>> {
        self.inner.modules()
    }

    fn index_ready(&self) -> watch::Receiver<bool> {
        self.inner.index_ready()
    }

    fn subscribe(&self, listener: Arc<dyn RootsListener>) -> SubscriptionId {
        self.inner.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id)
    }

    fn write_lock(&self) -> Arc<WriteLock> {
        self.inner.write_lock()
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.inner.execution_mode()
    }
}
