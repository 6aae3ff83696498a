use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use rootsync_core::{
    ChangeCause, LibraryId, LibraryOp, LibraryTable, ModuleKind, ModuleView, ProjectModel,
    RootKind, RootUrl, RootsChangedEvent, RootsListener,
};
use rootsync_project::{LibraryState, ManifestError, ManifestProject, ManifestWatcher};

const MANIFEST: &str = r#"
[project]
name = "demo"

[[module]]
name = "app"
kind = "java"

[[module.library]]
name = "foo"
classes = ["lib/foo.jar"]
sources = ["lib/foo-src"]

[[module]]
name = "site"
kind = "web"
metadata_target = false
"#;

fn write_manifest(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("rootsync.toml");
    fs::write(&path, text).unwrap();
    path
}

#[derive(Default)]
struct Recorder(Mutex<Vec<RootsChangedEvent>>);

impl RootsListener for Recorder {
    fn roots_changed(&self, event: &RootsChangedEvent) {
        self.0.lock().push(event.clone());
    }
}

#[test]
fn load_resolves_roots_against_manifest_directory() {
    let dir = TempDir::new().unwrap();
    let project = ManifestProject::load(&write_manifest(dir.path(), MANIFEST)).unwrap();

    assert_eq!(project.name(), "demo");
    let modules = project.modules();
    assert_eq!(modules.len(), 2);

    let app = &modules[0];
    assert_eq!(app.kind(), ModuleKind::Java);
    let deps = app.library_dependencies();
    let expected = project.root().join("lib/foo.jar");
    assert_eq!(
        deps[0].classes,
        vec![RootUrl::new(expected.to_string_lossy())]
    );

    assert!(!modules[1].targets_metadata_format());
    assert!(*project.index_ready().borrow());
}

#[test]
fn committed_libraries_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(dir.path(), MANIFEST);
    let id = LibraryId::new_v4();
    {
        let project = ManifestProject::load(&manifest).unwrap();
        let app = project.inner().module("app").unwrap();
        let lock = project.write_lock();
        let _scope = lock.acquire();
        app.table()
            .apply(vec![
                LibraryOp::CreateLibrary {
                    id,
                    name: "<JavaScript metadata library>".into(),
                },
                LibraryOp::AddRoot {
                    id,
                    kind: RootKind::Classes,
                    url: RootUrl::new("/lib/foo.jar!/"),
                },
            ])
            .unwrap();
        assert!(project.state_path().exists());
    }

    let state = LibraryState::load(&LibraryState::path_for(&fs::canonicalize(dir.path()).unwrap()))
        .unwrap();
    assert_eq!(state.project, "demo");
    assert_eq!(state.modules["app"].len(), 1);

    let reopened = ManifestProject::load(&manifest).unwrap();
    let table = reopened.inner().module("app").unwrap().table().clone();
    let libs = table.libraries();
    assert_eq!(libs.len(), 1);
    assert_eq!(libs[0].id, id);
    assert_eq!(
        table.roots(id).unwrap().classes.into_iter().collect::<Vec<_>>(),
        vec![RootUrl::new("/lib/foo.jar!/")]
    );
}

#[test]
fn reload_updates_modules_in_place() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(dir.path(), MANIFEST);
    let project = ManifestProject::load(&manifest).unwrap();
    let site = project.inner().module("site").unwrap();
    let recorder = Arc::new(Recorder::default());
    project.subscribe(recorder.clone());

    fs::write(
        &manifest,
        r#"
[project]
name = "demo"

[[module]]
name = "app"

[[module]]
name = "tools"
kind = "plugin"
"#,
    )
    .unwrap();
    let summary = project.reload().unwrap();

    assert_eq!(summary.added, vec!["tools".to_string()]);
    assert_eq!(summary.removed, vec!["site".to_string()]);
    assert_eq!(summary.updated, 1);
    assert!(site.is_disposed());
    assert!(project
        .inner()
        .module("app")
        .unwrap()
        .library_dependencies()
        .is_empty());
    assert!(*project.index_ready().borrow());

    let events = recorder.0.lock();
    assert_eq!(
        events.last().map(|e| (e.module.clone(), e.cause)),
        Some((None, ChangeCause::Dependencies))
    );
}

#[test]
fn broken_manifest_leaves_project_untouched() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(dir.path(), MANIFEST);
    let project = ManifestProject::load(&manifest).unwrap();

    fs::write(&manifest, "[project\n").unwrap();
    assert!(matches!(project.reload(), Err(ManifestError::Parse(_))));
    assert_eq!(project.modules().len(), 2);
    assert!(*project.index_ready().borrow());
}

#[test]
fn missing_manifest_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let err = ManifestProject::load(&dir.path().join("rootsync.toml"))
        .err()
        .expect("load must fail");
    assert!(matches!(err, ManifestError::Io { .. }));
}

#[test]
fn watcher_reloads_after_manifest_edit() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(dir.path(), MANIFEST);
    let project = ManifestProject::load(&manifest).unwrap();
    let handle = ManifestWatcher::new(project.clone())
        .with_debounce(Duration::from_millis(50))
        .spawn()
        .unwrap();

    let appended = format!("{}\n[[module]]\nname = \"extra\"\n", MANIFEST);
    fs::write(&manifest, appended).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while project.inner().module("extra").is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(25));
    }
    assert!(project.inner().module("extra").is_some());
    assert!(handle.reloads() >= 1);
    handle.stop();
}
