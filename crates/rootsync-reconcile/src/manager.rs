use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use rootsync_core::{
    ArtifactInspector, ConfigManager, ModuleId, ProjectModel, Result, RootSyncConfig,
    RootSyncError, SubscriptionId,
};

use crate::{ChangeSet, EventGate, MetricsSnapshot, ModuleOutcome, PassReport, Reconciler};

/// Owns the reconciliation machinery of one open project.
///
/// `open` subscribes to the project and schedules the initial pass; `close`
/// unsubscribes and stops the worker. Without a tokio runtime the manager is
/// passive and passes run only through [`reconcile_now`](Self::reconcile_now)
/// or the gate's synchronous trigger.
pub struct LibraryManager {
    project: Arc<dyn ProjectModel>,
    config: RootSyncConfig,
    reconciler: Arc<Reconciler>,
    gate: Arc<EventGate>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl LibraryManager {
    pub fn open(
        project: Arc<dyn ProjectModel>,
        config: RootSyncConfig,
        inspector: Arc<dyn ArtifactInspector>,
    ) -> Result<Arc<Self>> {
        ConfigManager::validate_config(&config)?;

        let reconciler = Arc::new(Reconciler::new(&config, inspector));
        let gate = EventGate::new(project.clone(), reconciler.clone(), config.gate.clone());
        let subscription = project.subscribe(gate.listener());

        if gate.start() {
            gate.request_pass();
        }
        info!(
            "library manager opened for {} ({} modules)",
            project.name(),
            project.modules().len()
        );

        Ok(Arc::new(Self {
            project,
            config,
            reconciler,
            gate,
            subscription: Mutex::new(Some(subscription)),
        }))
    }

    pub async fn close(&self) {
        self.unsubscribe();
        self.gate.shutdown().await;
        info!("library manager closed for {}", self.project.name());
    }

    pub fn request_pass(&self) -> Result<()> {
        if self.gate.is_closed() {
            return Err(RootSyncError::GateClosed);
        }
        self.gate.request_pass();
        Ok(())
    }

    /// Run a full pass on the calling thread, bypassing the gate.
    pub fn reconcile_now(&self) -> Result<PassReport> {
        if self.gate.is_closed() {
            return Err(RootSyncError::GateClosed);
        }
        self.reconciler.run_pass(&*self.project)
    }

    /// Replace one module's managed library with `changes`.
    pub fn reset_library(&self, module: &ModuleId, changes: ChangeSet) -> Result<ModuleOutcome> {
        let view = self
            .project
            .modules()
            .into_iter()
            .find(|m| &m.id() == module)
            .ok_or_else(|| RootSyncError::ModuleDisposed(module.clone()))?;
        self.reconciler
            .reset_library(&*self.project, &*view, changes)
    }

    pub fn project(&self) -> &Arc<dyn ProjectModel> {
        &self.project
    }

    pub fn config(&self) -> &RootSyncConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn gate(&self) -> &Arc<EventGate> {
        &self.gate
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.reconciler.metrics().snapshot()
    }

    fn unsubscribe(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.project.unsubscribe(id);
            debug!("unsubscribed {:?} from {}", id, self.project.name());
        }
    }
}

impl Drop for LibraryManager {
    fn drop(&mut self) {
        self.unsubscribe();
        self.gate.cancel();
    }
}
