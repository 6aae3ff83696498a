use std::sync::Arc;
use tracing::{debug, trace};

use rootsync_core::{ArtifactInspector, ModuleKind, ModuleView, RootUrl, ScannerConfig};

/// Candidate roots found on one module. May contain duplicates; see [`crate::ChangeSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub classes: Vec<RootUrl>,
    pub sources: Vec<RootUrl>,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.sources.is_empty()
    }
}

/// Extracts the metadata-carrying part of a module's library dependencies.
pub struct DependencyScanner {
    inspector: Arc<dyn ArtifactInspector>,
    applicable_kinds: Vec<ModuleKind>,
}

impl DependencyScanner {
    pub fn new(inspector: Arc<dyn ArtifactInspector>, config: &ScannerConfig) -> Self {
        Self {
            inspector,
            applicable_kinds: config.applicable_kinds.clone(),
        }
    }

    pub fn is_applicable(&self, module: &dyn ModuleView) -> bool {
        self.applicable_kinds.contains(&module.kind())
    }

    /// Pure read of the module's dependencies. Roots that no longer resolve are skipped.
    pub fn scan(&self, module: &dyn ModuleView) -> ScanResult {
        let mut result = ScanResult::default();
        if !self.is_applicable(module) || !module.targets_metadata_format() {
            return result;
        }

        for dependency in module.library_dependencies() {
            let mut matched = false;
            for root in &dependency.classes {
                let Some(path) = self.inspector.resolve(root) else {
                    debug!(
                        "skipping stale classpath root {} of {} in {}",
                        root,
                        dependency.name,
                        module.id()
                    );
                    continue;
                };
                if self.inspector.carries_metadata(&path) {
                    result.classes.push(RootUrl::archive_root(&path));
                    matched = true;
                }
            }
            if matched {
                result.sources.extend(dependency.sources.iter().cloned());
            } else {
                trace!("{} carries no metadata", dependency.name);
            }
        }
        result
    }
}
