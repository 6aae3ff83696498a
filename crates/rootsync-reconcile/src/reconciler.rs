use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use rootsync_core::{
    ArtifactInspector, LibraryConfig, LibraryRoots, ModuleId, ModuleView, ProjectModel, Result,
    RootSyncConfig, Suppression, WriteLock,
};

use crate::{ChangeSet, DependencyScanner, LibraryStore, ReconcileMetrics};

/// What one reconciliation did to one module's managed library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleOutcome {
    Created,
    Updated,
    Removed,
    /// Desired and current state already agree; no transaction was committed.
    Unchanged,
    /// Not a metadata target and nothing to clean up.
    Skipped,
    /// The module was disposed while the pass was in flight.
    Abandoned,
    /// The commit failed; the pass carried on with the remaining modules.
    Failed,
}

impl ModuleOutcome {
    pub fn committed(self) -> bool {
        matches!(
            self,
            ModuleOutcome::Created | ModuleOutcome::Updated | ModuleOutcome::Removed
        )
    }
}

impl fmt::Display for ModuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleOutcome::Created => "created",
            ModuleOutcome::Updated => "updated",
            ModuleOutcome::Removed => "removed",
            ModuleOutcome::Unchanged => "unchanged",
            ModuleOutcome::Skipped => "skipped",
            ModuleOutcome::Abandoned => "abandoned",
            ModuleOutcome::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub module: ModuleId,
    pub outcome: ModuleOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub modules: Vec<ModuleReport>,
}

impl PassReport {
    pub fn commits(&self) -> usize {
        self.modules
            .iter()
            .filter(|m| m.outcome.committed())
            .count()
    }

    pub fn failures(&self) -> usize {
        self.modules
            .iter()
            .filter(|m| m.outcome == ModuleOutcome::Failed)
            .count()
    }

    pub fn outcome_for(&self, module: &str) -> Option<ModuleOutcome> {
        self.modules
            .iter()
            .find(|m| m.module.as_str() == module)
            .map(|m| m.outcome)
    }
}

/// Diffs desired against committed state and applies the difference.
///
/// Holds the commit lock for every module it touches so at most one library
/// mutation is in flight across the project, and commits under a suppression
/// guard so its own writes are not mistaken for external changes.
pub struct Reconciler {
    library: LibraryConfig,
    scanner: DependencyScanner,
    suppression: Arc<Suppression>,
    commit_lock: Mutex<()>,
    metrics: Arc<ReconcileMetrics>,
}

impl Reconciler {
    pub fn new(config: &RootSyncConfig, inspector: Arc<dyn ArtifactInspector>) -> Self {
        Self {
            library: config.library.clone(),
            scanner: DependencyScanner::new(inspector, &config.scanner),
            suppression: Arc::new(Suppression::new()),
            commit_lock: Mutex::new(()),
            metrics: Arc::new(ReconcileMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ReconcileMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn suppression(&self) -> Arc<Suppression> {
        self.suppression.clone()
    }

    pub fn metrics(&self) -> Arc<ReconcileMetrics> {
        self.metrics.clone()
    }

    pub fn scanner(&self) -> &DependencyScanner {
        &self.scanner
    }

    pub fn store_for(&self, write_lock: Arc<WriteLock>, module: &dyn ModuleView) -> LibraryStore {
        LibraryStore::new(
            module.id(),
            module.library_table(),
            write_lock,
            self.library.clone(),
        )
    }

    /// Desired state of a module from its current dependency data.
    pub fn desired_state(&self, module: &dyn ModuleView) -> ChangeSet {
        ChangeSet::from_scan(self.scanner.scan(module))
    }

    /// One full pass over every module of the project.
    ///
    /// A module whose commit fails does not stop the pass. The first failure
    /// is returned once every module has been visited.
    pub fn run_pass(&self, project: &dyn ProjectModel) -> Result<PassReport> {
        let started = Instant::now();
        let mut report = PassReport {
            project: project.name().to_string(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            modules: Vec::new(),
        };
        if project.is_disposed() {
            debug!("project {} disposed; skipping pass", project.name());
            return Ok(report);
        }

        let mut first_error = None;
        for module in project.modules() {
            let outcome = match self.reconcile_module(project, &*module) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = self.finish(&*module, ModuleOutcome::Failed);
                    first_error.get_or_insert(e);
                    outcome
                }
            };
            report.modules.push(ModuleReport {
                module: module.id(),
                outcome,
            });
        }

        report.duration = started.elapsed();
        if let Some(e) = first_error {
            warn!(
                "pass over {} finished with {} failed modules",
                report.project,
                report.failures()
            );
            return Err(e);
        }
        self.metrics.record_pass();
        info!(
            "reconciled {} modules of {} ({} commits) in {:?}",
            report.modules.len(),
            report.project,
            report.commits(),
            report.duration
        );
        Ok(report)
    }

    pub fn reconcile_module(
        &self,
        project: &dyn ProjectModel,
        module: &dyn ModuleView,
    ) -> Result<ModuleOutcome> {
        if module.is_disposed() {
            return Ok(self.finish(module, ModuleOutcome::Abandoned));
        }

        let participates = self.scanner.is_applicable(module) && module.targets_metadata_format();
        if !participates {
            let store = self.store_for(project.write_lock(), module);
            if store.find_managed().is_none() {
                return Ok(self.finish(module, ModuleOutcome::Skipped));
            }
            debug!(
                "module {} no longer takes part; removing managed library",
                module.id()
            );
            return self.apply(project, module, ChangeSet::empty());
        }

        let desired = self.desired_state(module);
        self.apply(project, module, desired)
    }

    /// Force a module's managed library to exactly `changes`.
    pub fn reset_library(
        &self,
        project: &dyn ProjectModel,
        module: &dyn ModuleView,
        changes: ChangeSet,
    ) -> Result<ModuleOutcome> {
        self.apply(project, module, changes)
    }

    fn apply(
        &self,
        project: &dyn ProjectModel,
        module: &dyn ModuleView,
        changes: ChangeSet,
    ) -> Result<ModuleOutcome> {
        let write_lock = project.write_lock();
        let _scope = write_lock.acquire();
        let _commit = self.commit_lock.lock();

        if module.is_disposed() {
            return Ok(self.finish(module, ModuleOutcome::Abandoned));
        }

        let store = self.store_for(write_lock.clone(), module);
        let existing = store.find_managed();
        let mut tx = store.transaction()?;

        let outcome = match existing {
            None if changes.is_empty() => {
                tx.abandon();
                return Ok(self.finish(module, ModuleOutcome::Unchanged));
            }
            Some(library) if changes.is_empty() => {
                tx.remove_library(library.id)?;
                ModuleOutcome::Removed
            }
            None => {
                let id = tx.create_library(store.managed_name())?;
                tx.replace_roots(id, &LibraryRoots::default(), &changes.into_roots())?;
                ModuleOutcome::Created
            }
            Some(library) => {
                let current = store.roots(library.id)?;
                if changes.matches(&current) {
                    tx.abandon();
                    return Ok(self.finish(module, ModuleOutcome::Unchanged));
                }
                tx.replace_roots(library.id, &current, &changes.into_roots())?;
                ModuleOutcome::Updated
            }
        };

        if module.is_disposed() {
            tx.abandon();
            return Ok(self.finish(module, ModuleOutcome::Abandoned));
        }

        let committed = {
            let _muted = self.suppression.begin();
            tx.commit()
        };
        match committed {
            Ok(_) => Ok(self.finish(module, outcome)),
            Err(e) if e.is_disposed_race() => {
                debug!("module {} disposed during commit", module.id());
                Ok(self.finish(module, ModuleOutcome::Abandoned))
            }
            Err(e) => {
                warn!("commit for module {} failed: {}", module.id(), e);
                Err(e)
            }
        }
    }

    fn finish(&self, module: &dyn ModuleView, outcome: ModuleOutcome) -> ModuleOutcome {
        self.metrics.record_outcome(outcome);
        if outcome.committed() {
            info!("managed library of {} {}", module.id(), outcome);
        } else {
            debug!("managed library of {} {}", module.id(), outcome);
        }
        outcome
    }
}
