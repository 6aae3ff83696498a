use crossbeam_channel::{select, unbounded, Receiver, Sender};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::{ManifestError, ManifestProject, STATE_DIR};

const IDLE_TICK: Duration = Duration::from_secs(1);

/// Reloads a manifest project when files under its root change.
///
/// Raw events are coalesced: a reload runs once the tree has been quiet for
/// the debounce interval. Changes under `.rootsync/` are the project's own
/// writes and never trigger a reload.
pub struct ManifestWatcher {
    project: Arc<ManifestProject>,
    debounce: Duration,
}

impl ManifestWatcher {
    pub fn new(project: Arc<ManifestProject>) -> Self {
        Self {
            project,
            debounce: Duration::from_millis(200),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching on a dedicated thread.
    pub fn spawn(self) -> Result<WatchHandle, ManifestError> {
        let (event_tx, event_rx) = unbounded::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        })?;
        watcher.watch(self.project.root(), RecursiveMode::Recursive)?;
        info!("watching {}", self.project.root().display());

        let (stop_tx, stop_rx) = unbounded::<()>();
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = reloads.clone();
        let root = self.project.root().to_path_buf();
        let thread = thread::Builder::new()
            .name("rootsync-watch".to_string())
            .spawn(move || {
                // keep the OS watch alive for the lifetime of the loop
                let _watcher = watcher;
                self.run(event_rx, stop_rx, counter);
            })
            .map_err(|source| ManifestError::Io { path: root, source })?;

        Ok(WatchHandle {
            stop: stop_tx,
            thread: Some(thread),
            reloads,
        })
    }

    fn run(
        &self,
        events: Receiver<notify::Result<Event>>,
        stop: Receiver<()>,
        reloads: Arc<AtomicUsize>,
    ) {
        let mut dirty_since: Option<Instant> = None;
        loop {
            let timeout = match dirty_since {
                Some(since) => self.debounce.saturating_sub(since.elapsed()),
                None => IDLE_TICK,
            };
            select! {
                recv(stop) -> _ => break,
                recv(events) -> msg => match msg {
                    Ok(Ok(event)) => {
                        if self.is_relevant(&event) {
                            dirty_since = Some(Instant::now());
                        }
                    }
                    Ok(Err(e)) => error!("watcher error: {:?}", e),
                    Err(_) => {
                        warn!("file watcher disconnected");
                        break;
                    }
                },
                default(timeout) => {}
            }

            if dirty_since.is_some_and(|since| since.elapsed() >= self.debounce) {
                dirty_since = None;
                match self.project.reload() {
                    Ok(summary) => {
                        reloads.fetch_add(1, Ordering::SeqCst);
                        debug!("reload after file change: {:?}", summary);
                    }
                    Err(e) => warn!(
                        "reload of {} failed: {}",
                        self.project.manifest_path().display(),
                        e
                    ),
                }
            }
        }
        debug!("manifest watcher stopped");
    }

    fn is_relevant(&self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        let state_dir = self.project.root().join(STATE_DIR);
        event
            .paths
            .iter()
            .any(|p| !p.starts_with(&state_dir))
    }
}

/// Stops the watcher thread when dropped.
pub struct WatchHandle {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
    reloads: Arc<AtomicUsize>,
}

impl WatchHandle {
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("manifest watcher thread panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn state_directory_changes_are_ignored() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("rootsync.toml");
        fs::write(&manifest, "[project]\nname = \"w\"\n").unwrap();
        let project = ManifestProject::load(&manifest).unwrap();
        let watcher = ManifestWatcher::new(project.clone());

        let own = Event::new(EventKind::Any).add_path(project.state_path().to_path_buf());
        assert!(!watcher.is_relevant(&own));

        let edit = Event::new(EventKind::Any).add_path(project.manifest_path().to_path_buf());
        assert!(watcher.is_relevant(&edit));
    }
}
