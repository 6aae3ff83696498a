use std::sync::Arc;
use std::time::Duration;

use rootsync_core::{
    LibraryDependency, ModuleKind, ProjectModel, RootSyncConfig, RootSyncError, RootUrl,
};
use rootsync_project::{InMemoryModule, InMemoryProject, StaticInspector};
use rootsync_reconcile::{GateMode, LibraryManager, ModuleOutcome};

const MANAGED: &str = "<JavaScript metadata library>";

fn fast_config() -> RootSyncConfig {
    let mut config = RootSyncConfig::default();
    config.gate.debounce_ms = 5;
    config
}

fn foo() -> LibraryDependency {
    LibraryDependency::new("foo")
        .with_class_root("/lib/foo.jar")
        .with_source_root("/lib/foo-src")
}

fn bar() -> LibraryDependency {
    LibraryDependency::new("bar").with_class_root("/lib/bar.jar")
}

fn inspector() -> Arc<StaticInspector> {
    Arc::new(StaticInspector::with_metadata(["/lib/foo.jar", "/lib/bar.jar"]))
}

fn classes_of(module: &InMemoryModule) -> Vec<RootUrl> {
    module
        .table()
        .managed_roots(MANAGED)
        .map(|r| r.classes.into_iter().collect())
        .unwrap_or_default()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_waits_for_index_ready() {
    let project = InMemoryProject::new("p");
    project.set_index_ready(false);
    let module = project.add_module("m", ModuleKind::Java, true);
    module.set_dependencies(vec![foo()]);

    let manager = LibraryManager::open(project.clone(), fast_config(), inspector()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(module.table().commit_count(), 0);
    assert_eq!(manager.gate().mode(), GateMode::Pending);

    project.set_index_ready(true);
    eventually(|| module.table().commit_count() == 1).await;
    assert_eq!(classes_of(&module), vec![RootUrl::new("/lib/foo.jar!/")]);

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn own_commits_do_not_schedule_more_passes() {
    let project = InMemoryProject::new("p");
    let module = project.add_module("m", ModuleKind::Java, true);
    module.set_dependencies(vec![foo()]);

    let manager = LibraryManager::open(project.clone(), fast_config(), inspector()).unwrap();
    eventually(|| module.table().commit_count() == 1).await;
    eventually(|| manager.gate().mode() == GateMode::Idle).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let metrics = manager.metrics();
    assert_eq!(metrics.passes, 1);
    assert!(metrics.suppressed >= 1);
    assert_eq!(manager.gate().mode(), GateMode::Idle);

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bursts_converge_on_latest_dependencies() {
    let project = InMemoryProject::new("p");
    let module = project.add_module("m", ModuleKind::Java, true);
    let manager = LibraryManager::open(project.clone(), fast_config(), inspector()).unwrap();
    eventually(|| manager.gate().mode() == GateMode::Idle).await;

    module.set_dependencies(vec![foo()]);
    module.add_dependency(bar());
    module.remove_dependency("foo");
    module.set_dependencies(vec![foo(), bar()]);
    module.remove_dependency("bar");

    eventually(|| {
        manager.gate().mode() == GateMode::Idle
            && classes_of(&module) == vec![RootUrl::new("/lib/foo.jar!/")]
    })
    .await;
    assert!(manager.metrics().coalesced + manager.metrics().passes >= 2);

    module.set_dependencies(vec![]);
    eventually(|| module.table().libraries_snapshot().is_empty()).await;

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_pass_is_retried_with_backoff() {
    let project = InMemoryProject::new("p");
    let module = project.add_module("m", ModuleKind::Java, true);
    module.set_dependencies(vec![foo()]);
    module.table().fail_next_commit("transient");

    let mut config = fast_config();
    config.gate.retry.max_retries = 2;
    config.gate.retry.initial_backoff_ms = 10;
    let manager = LibraryManager::open(project.clone(), config, inspector()).unwrap();

    eventually(|| module.table().commit_count() == 1).await;
    eventually(|| manager.gate().mode() == GateMode::Idle).await;
    assert!(manager.gate().last_error().is_none());
    assert_eq!(manager.metrics().failed_passes, 0);

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_without_retry_is_recorded() {
    let project = InMemoryProject::new("p");
    let module = project.add_module("m", ModuleKind::Java, true);
    module.set_dependencies(vec![foo()]);
    module.table().fail_next_commit("disk full");

    let manager = LibraryManager::open(project.clone(), fast_config(), inspector()).unwrap();
    eventually(|| manager.gate().last_error().is_some()).await;
    eventually(|| manager.gate().mode() == GateMode::Idle).await;
    assert_eq!(manager.metrics().failed_passes, 1);
    assert!(module.table().libraries_snapshot().is_empty());

    manager.request_pass().unwrap();
    eventually(|| module.table().commit_count() == 1).await;

    manager.close().await;
}

#[tokio::test]
async fn closed_manager_refuses_work() {
    let project = InMemoryProject::new("p");
    let manager = LibraryManager::open(
        project.clone(),
        fast_config(),
        Arc::new(StaticInspector::default()),
    )
    .unwrap();
    manager.close().await;

    assert_eq!(project.listener_count(), 0);
    assert!(matches!(manager.request_pass(), Err(RootSyncError::GateClosed)));
    assert!(matches!(manager.reconcile_now(), Err(RootSyncError::GateClosed)));
}

#[test]
fn synchronous_scenario_create_keep_remove() {
    let project = InMemoryProject::for_tests("p");
    let module = project.add_module("m", ModuleKind::Java, true);
    module.set_dependencies(vec![foo()]);
    let manager =
        LibraryManager::open(project.clone(), RootSyncConfig::default(), inspector()).unwrap();

    let lock = project.write_lock();
    let _scope = lock.acquire();
    let gate = manager.gate();

    let first = gate.trigger_synchronous_reconciliation().unwrap();
    assert_eq!(first.outcome_for("m"), Some(ModuleOutcome::Created));
    let roots = module.table().managed_roots(MANAGED).unwrap();
    assert_eq!(
        roots.sources.into_iter().collect::<Vec<_>>(),
        vec![RootUrl::new("/lib/foo-src")]
    );
    assert_eq!(gate.mode(), GateMode::Idle);

    let second = gate.trigger_synchronous_reconciliation().unwrap();
    assert_eq!(second.outcome_for("m"), Some(ModuleOutcome::Unchanged));
    assert_eq!(module.table().commit_count(), 1);

    module.set_dependencies(vec![]);
    assert_eq!(gate.mode(), GateMode::Pending);
    let third = gate.trigger_synchronous_reconciliation().unwrap();
    assert_eq!(third.outcome_for("m"), Some(ModuleOutcome::Removed));
    assert!(module.table().libraries_snapshot().is_empty());
    assert_eq!(gate.mode(), GateMode::Idle);
}

#[test]
fn user_library_with_managed_prefix_is_adopted() {
    let project = InMemoryProject::for_tests("p");
    let module = project.add_module("m", ModuleKind::Java, true);
    let user = module
        .table()
        .insert_user_library("<JavaScript metadata library> (user)", Default::default());
    module.set_dependencies(vec![foo()]);
    let manager =
        LibraryManager::open(project.clone(), RootSyncConfig::default(), inspector()).unwrap();

    let report = manager.reconcile_now().unwrap();
    assert_eq!(report.outcome_for("m"), Some(ModuleOutcome::Updated));
    let libs = module.table().libraries_snapshot();
    assert_eq!(libs.len(), 1);
    assert_eq!(libs[0].id, user);
}
