use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use rootsync_core::{
    ExecutionMode, GateConfig, ProjectModel, Result, RootSyncError, RootsChangedEvent,
    RootsListener, Suppression,
};

use crate::{PassReport, ReconcileMetrics, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    Idle,
    Pending,
    Running,
}

#[derive(Debug)]
struct GateState {
    mode: GateMode,
    follow_up: bool,
}

/// Turns roots-changed notifications into reconciliation passes.
///
/// Holds at most one pending pass. A notification arriving while a pass runs
/// is remembered and schedules exactly one more pass afterwards.
pub struct EventGate {
    project: Arc<dyn ProjectModel>,
    reconciler: Arc<Reconciler>,
    suppression: Arc<Suppression>,
    metrics: Arc<ReconcileMetrics>,
    config: GateConfig,
    state: Mutex<GateState>,
    mode_tx: watch::Sender<GateMode>,
    wake: Notify,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<String>>,
    last_report: Mutex<Option<PassReport>>,
}

impl EventGate {
    pub fn new(
        project: Arc<dyn ProjectModel>,
        reconciler: Arc<Reconciler>,
        config: GateConfig,
    ) -> Arc<Self> {
        let (mode_tx, _) = watch::channel(GateMode::Idle);
        Arc::new(Self {
            suppression: reconciler.suppression(),
            metrics: reconciler.metrics(),
            project,
            reconciler,
            config,
            state: Mutex::new(GateState {
                mode: GateMode::Idle,
                follow_up: false,
            }),
            mode_tx,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
            last_error: Mutex::new(None),
            last_report: Mutex::new(None),
        })
    }

    /// Listener to register with the project. Holds the gate weakly.
    pub fn listener(self: &Arc<Self>) -> Arc<dyn RootsListener> {
        Arc::new(GateListener(Arc::downgrade(self)))
    }

    pub fn mode(&self) -> GateMode {
        self.state.lock().mode
    }

    pub fn watch_mode(&self) -> watch::Receiver<GateMode> {
        self.mode_tx.subscribe()
    }

    pub fn has_follow_up(&self) -> bool {
        self.state.lock().follow_up
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn last_report(&self) -> Option<PassReport> {
        self.last_report.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn on_roots_changed(&self, event: &RootsChangedEvent) {
        if self.suppression.is_active() {
            self.metrics.record_suppressed();
            trace!("ignoring self-triggered {:?} notification", event.cause);
            return;
        }
        debug!(
            "roots changed ({:?}, module {:?})",
            event.cause,
            event.module.as_ref().map(|m| m.as_str())
        );
        self.request_pass();
    }

    /// Schedule a pass unless one is already pending.
    pub fn request_pass(&self) {
        let mut state = self.state.lock();
        match state.mode {
            GateMode::Idle => {
                state.mode = GateMode::Pending;
                self.mode_tx.send_replace(GateMode::Pending);
                drop(state);
                self.metrics.record_scheduled();
                self.wake.notify_one();
            }
            GateMode::Pending => {
                self.metrics.record_coalesced();
            }
            GateMode::Running if state.follow_up => {
                self.metrics.record_coalesced();
            }
            GateMode::Running => {
                state.follow_up = true;
                self.metrics.record_scheduled();
            }
        }
    }

    /// Start the asynchronous worker on the current tokio runtime.
    /// Returns false when there is no runtime or the worker already runs.
    pub fn start(self: &Arc<Self>) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime; event gate stays synchronous");
            return false;
        };
        let mut worker = self.worker.lock();
        if worker.is_some() || self.cancel.is_cancelled() {
            return false;
        }
        let gate = self.clone();
        *worker = Some(handle.spawn(async move { gate.run_worker().await }));
        info!("event gate worker started for {}", self.project.name());
        true
    }

    /// Stop accepting work without waiting for the worker.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel the worker and wait for it to exit. A pass already on the
    /// blocking pool finishes first.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!("event gate worker ended abnormally: {}", e);
            }
        }
        self.set_mode(GateMode::Idle);
    }

    /// Run one full pass inline. Only for unit tests, and only while the
    /// calling thread holds the project's write scope.
    pub fn trigger_synchronous_reconciliation(&self) -> Result<PassReport> {
        if self.project.execution_mode() != ExecutionMode::UnitTest {
            error!("synchronous reconciliation requested outside unit-test mode");
            return Err(RootSyncError::SynchronousOutsideTest);
        }
        if !self.project.write_lock().is_held_by_current_thread() {
            error!("synchronous reconciliation requested without the write scope");
            return Err(RootSyncError::WriteScopeNotHeld);
        }

        let owned = {
            let mut state = self.state.lock();
            if state.mode == GateMode::Running {
                false
            } else {
                state.mode = GateMode::Running;
                self.mode_tx.send_replace(GateMode::Running);
                true
            }
        };

        let result = self.reconciler.run_pass(&*self.project);
        self.record(&result);
        if owned {
            self.finish_run();
        }
        result
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
            }

            let debounce = self.config.debounce();
            if !debounce.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(debounce) => {}
                }
            }

            if !self.wait_for_index().await {
                break;
            }
            if !self.begin_run() {
                trace!("pending pass already served");
                continue;
            }

            let result = self.run_with_retry().await;
            self.record(&result);
            self.finish_run();
        }
        debug!("event gate worker for {} stopped", self.project.name());
    }

    /// Unbounded wait for the index-ready signal. False only on cancellation.
    async fn wait_for_index(&self) -> bool {
        let mut ready = self.project.index_ready();
        loop {
            if *ready.borrow_and_update() {
                return true;
            }
            debug!("waiting for index of {}", self.project.name());
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = ready.changed() => {
                    if changed.is_err() && !*ready.borrow() {
                        warn!(
                            "index-ready signal of {} closed while not ready",
                            self.project.name()
                        );
                        self.cancel.cancelled().await;
                        return false;
                    }
                }
            }
        }
    }

    fn begin_run(&self) -> bool {
        let mut state = self.state.lock();
        if state.mode != GateMode::Pending {
            return false;
        }
        state.mode = GateMode::Running;
        self.mode_tx.send_replace(GateMode::Running);
        true
    }

    fn finish_run(&self) {
        let mut state = self.state.lock();
        if state.follow_up {
            state.follow_up = false;
            state.mode = GateMode::Pending;
            self.mode_tx.send_replace(GateMode::Pending);
            drop(state);
            self.wake.notify_one();
        } else {
            state.mode = GateMode::Idle;
            self.mode_tx.send_replace(GateMode::Idle);
        }
    }

    fn set_mode(&self, mode: GateMode) {
        let mut state = self.state.lock();
        state.mode = mode;
        state.follow_up = false;
        self.mode_tx.send_replace(mode);
    }

    async fn run_with_retry(&self) -> Result<PassReport> {
        let mut attempt = 0u32;
        loop {
            let reconciler = self.reconciler.clone();
            let project = self.project.clone();
            let outcome = tokio::task::spawn_blocking(move || reconciler.run_pass(&*project))
                .await
                .unwrap_or_else(|e| {
                    Err(RootSyncError::Transaction(format!(
                        "reconciliation task failed: {}",
                        e
                    )))
                });

            let err = match outcome {
                Ok(report) => return Ok(report),
                Err(e) => e,
            };
            if err.is_programming_error() || attempt >= self.config.retry.max_retries {
                return Err(err);
            }
            attempt += 1;
            let delay = self.config.retry.delay_for(attempt);
            warn!(
                "reconciliation of {} failed ({}); retry {}/{} in {:?}",
                self.project.name(),
                err,
                attempt,
                self.config.retry.max_retries,
                delay
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn record(&self, result: &Result<PassReport>) {
        match result {
            Ok(report) => {
                *self.last_error.lock() = None;
                *self.last_report.lock() = Some(report.clone());
            }
            Err(e) => {
                self.metrics.record_failed_pass();
                error!("reconciliation of {} failed: {}", self.project.name(), e);
                *self.last_error.lock() = Some(e.to_string());
            }
        }
    }
}

/// Registered with the project so the subscription does not keep the gate alive.
pub struct GateListener(Weak<EventGate>);

impl RootsListener for GateListener {
    fn roots_changed(&self, event: &RootsChangedEvent) {
        if let Some(gate) = self.0.upgrade() {
            gate.on_roots_changed(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootsync_core::{ChangeCause, LibraryDependency, ModuleKind, ProjectModel, RootSyncConfig};
    use rootsync_project::{InMemoryProject, StaticInspector};

    fn gate_for(project: &Arc<InMemoryProject>, inspector: StaticInspector) -> Arc<EventGate> {
        let config = RootSyncConfig::default();
        let reconciler = Arc::new(Reconciler::new(&config, Arc::new(inspector)));
        let gate = EventGate::new(project.clone(), reconciler, config.gate);
        project.subscribe(gate.listener());
        gate
    }

    #[test]
    fn notifications_coalesce_while_pending() {
        let project = InMemoryProject::for_tests("p");
        let gate = gate_for(&project, StaticInspector::default());

        project.fire(RootsChangedEvent::project_wide(ChangeCause::Dependencies));
        assert_eq!(gate.mode(), GateMode::Pending);
        project.fire(RootsChangedEvent::project_wide(ChangeCause::Dependencies));
        assert_eq!(gate.mode(), GateMode::Pending);

        let snap = gate.metrics.snapshot();
        assert_eq!(snap.scheduled, 1);
        assert_eq!(snap.coalesced, 1);
    }

    #[test]
    fn suppressed_notifications_are_ignored() {
        let project = InMemoryProject::for_tests("p");
        let gate = gate_for(&project, StaticInspector::default());
        {
            let _muted = gate.suppression.begin();
            gate.on_roots_changed(&RootsChangedEvent::project_wide(
                ChangeCause::LibraryTable,
            ));
        }
        assert_eq!(gate.mode(), GateMode::Idle);
        assert_eq!(gate.metrics.snapshot().suppressed, 1);
    }

    #[test]
    fn synchronous_pass_requires_test_mode() {
        let project = InMemoryProject::new("p");
        let gate = gate_for(&project, StaticInspector::default());
        let lock = project.write_lock();
        let _scope = lock.acquire();
        assert!(matches!(
            gate.trigger_synchronous_reconciliation(),
            Err(RootSyncError::SynchronousOutsideTest)
        ));
    }

    #[test]
    fn synchronous_pass_requires_write_scope() {
        let project = InMemoryProject::for_tests("p");
        let gate = gate_for(&project, StaticInspector::default());
        let err = gate.trigger_synchronous_reconciliation().unwrap_err();
        assert!(matches!(err, RootSyncError::WriteScopeNotHeld));
        assert!(err.is_programming_error());
    }

    #[test]
    fn own_commit_does_not_retrigger_the_gate() {
        let project = InMemoryProject::for_tests("p");
        let module = project.add_module("m", ModuleKind::Java, true);
        module.set_dependencies(vec![LibraryDependency::new("foo")
            .with_class_root("/lib/foo.jar")
            .with_source_root("/lib/foo-src")]);
        let gate = gate_for(&project, StaticInspector::with_metadata(["/lib/foo.jar"]));

        let lock = project.write_lock();
        let _scope = lock.acquire();
        let report = gate.trigger_synchronous_reconciliation().unwrap();
        assert_eq!(report.commits(), 1);
        assert_eq!(gate.mode(), GateMode::Idle);
        assert!(gate.metrics.snapshot().suppressed >= 1);

        let again = gate.trigger_synchronous_reconciliation().unwrap();
        assert_eq!(again.commits(), 0);
        assert_eq!(module.table().commit_count(), 1);
    }

    #[test]
    fn synchronous_pass_clears_pending() {
        let project = InMemoryProject::for_tests("p");
        let gate = gate_for(&project, StaticInspector::default());
        gate.request_pass();
        assert_eq!(gate.mode(), GateMode::Pending);

        let lock = project.write_lock();
        let _scope = lock.acquire();
        gate.trigger_synchronous_reconciliation().unwrap();
        assert_eq!(gate.mode(), GateMode::Idle);
    }

    #[test]
    fn notification_while_running_schedules_follow_up() {
        let project = InMemoryProject::for_tests("p");
        let gate = gate_for(&project, StaticInspector::default());
        gate.request_pass();
        assert!(gate.begin_run());
        assert_eq!(gate.mode(), GateMode::Running);

        gate.request_pass();
        gate.request_pass();
        assert!(gate.has_follow_up());
        assert_eq!(gate.metrics.snapshot().coalesced, 1);

        gate.finish_run();
        assert_eq!(gate.mode(), GateMode::Pending);
        assert!(!gate.has_follow_up());
    }

    #[test]
    fn edit_racing_a_commit_is_not_swallowed() {
        use parking_lot::Mutex;
        use rootsync_core::{ModuleId, RootUrl};

        let project = InMemoryProject::for_tests("p");
        let module = project.add_module("m", ModuleKind::Java, true);
        module.set_dependencies(vec![
            LibraryDependency::new("foo").with_class_root("/lib/foo.jar")
        ]);
        let gate = gate_for(
            &project,
            StaticInspector::with_metadata(["/lib/foo.jar", "/lib/bar.jar"]),
        );

        let editor = Arc::new(Mutex::new(None));
        let slot = editor.clone();
        let target = module.clone();
        project.set_commit_observer(Arc::new(move |_: &ModuleId| {
            let mut slot = slot.lock();
            if slot.is_none() {
                let target = target.clone();
                *slot = Some(std::thread::spawn(move || {
                    target.add_dependency(
                        LibraryDependency::new("bar").with_class_root("/lib/bar.jar"),
                    );
                }));
            }
        }));

        let lock = project.write_lock();
        {
            let _scope = lock.acquire();
            gate.trigger_synchronous_reconciliation().unwrap();
        }
        if let Some(handle) = editor.lock().take() {
            handle.join().unwrap();
        }
        assert_eq!(gate.mode(), GateMode::Pending);

        let _scope = lock.acquire();
        gate.trigger_synchronous_reconciliation().unwrap();
        let classes: Vec<_> = module
            .table()
            .managed_roots("<JavaScript metadata library>")
            .unwrap()
            .classes
            .into_iter()
            .collect();
        assert_eq!(
            classes,
            vec![RootUrl::new("/lib/bar.jar!/"), RootUrl::new("/lib/foo.jar!/")]
        );
        assert_eq!(gate.mode(), GateMode::Idle);
    }
}
