use dashmap::DashMap;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace};
use walkdir::WalkDir;

use rootsync_core::{ArtifactInspector, RootUrl, ScannerConfig};

/// Inspects artifacts on the local filesystem.
///
/// A file carries metadata when its bytes contain one of the markers; archive
/// directories store entry names uncompressed, so this finds `*.meta.js`
/// entries without unpacking. A directory carries metadata when a file within
/// `max_depth` has a name ending in a marker. Results are cached per path and
/// invalidated when size or mtime change.
pub struct FsArtifactInspector {
    markers: Vec<String>,
    max_depth: usize,
    cache: DashMap<PathBuf, CachedVerdict>,
}

#[derive(Debug, Clone, Copy)]
struct CachedVerdict {
    modified: Option<SystemTime>,
    len: u64,
    carries: bool,
}

impl FsArtifactInspector {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            markers: config.metadata_markers.clone(),
            max_depth: config.max_scan_depth,
            cache: DashMap::new(),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn file_contains_marker(&self, path: &Path) -> bool {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                debug!("cannot read {}: {}", path.display(), e);
                return false;
            }
        };
        self.markers.iter().any(|marker| {
            let needle = marker.as_bytes();
            !needle.is_empty() && bytes.windows(needle.len()).any(|w| w == needle)
        })
    }

    fn directory_contains_marker(&self, path: &Path) -> bool {
        WalkDir::new(path)
            .max_depth(self.max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .any(|e| {
                let name = e.file_name().to_string_lossy();
                self.markers.iter().any(|m| name.ends_with(m.as_str()))
            })
    }
}

impl ArtifactInspector for FsArtifactInspector {
    fn resolve(&self, root: &RootUrl) -> Option<PathBuf> {
        let local = root.local_path();
        match fs::canonicalize(&local) {
            Ok(path) => Some(path),
            Err(_) => {
                trace!("{} does not resolve", root);
                None
            }
        }
    }

    fn carries_metadata(&self, path: &Path) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        let modified = meta.modified().ok();
        let len = meta.len();
        if let Some(hit) = self.cache.get(path) {
            if hit.modified == modified && hit.len == len {
                return hit.carries;
            }
        }

        let carries = if meta.is_dir() {
            self.directory_contains_marker(path)
        } else {
            self.file_contains_marker(path)
        };
        self.cache.insert(
            path.to_path_buf(),
            CachedVerdict {
                modified,
                len,
                carries,
            },
        );
        carries
    }
}

/// Inspector answering from fixed path sets. Nothing touches the disk.
#[derive(Debug, Clone, Default)]
pub struct StaticInspector {
    metadata: HashSet<PathBuf>,
    existing: HashSet<PathBuf>,
}

impl StaticInspector {
    pub fn with_metadata<I>(paths: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        Self {
            metadata: paths.into_iter().map(Into::into).collect(),
            existing: HashSet::new(),
        }
    }

    /// Paths that resolve but carry no metadata.
    pub fn and_existing<I>(mut self, paths: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        self.existing.extend(paths.into_iter().map(Into::into));
        self
    }
}

impl ArtifactInspector for StaticInspector {
    fn resolve(&self, root: &RootUrl) -> Option<PathBuf> {
        let path = root.local_path();
        (self.metadata.contains(&path) || self.existing.contains(&path)).then_some(path)
    }

    fn carries_metadata(&self, path: &Path) -> bool {
        self.metadata.contains(path)
    }
}
