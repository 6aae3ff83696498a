use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{LibraryEntry, ManifestError};

pub const STATE_DIR: &str = ".rootsync";
pub const STATE_FILE: &str = "libraries.json";

/// Library tables of every module, keyed by module name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryState {
    pub project: String,
    #[serde(default)]
    pub modules: BTreeMap<String, Vec<LibraryEntry>>,
}

impl LibraryState {
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(STATE_FILE)
    }

    /// Missing file means empty state.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write through a temp file and rename so readers never see a partial file.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let io_err = |source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        debug!("saved library state of {} modules", self.modules.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootsync_core::{LibraryId, LibraryRoots, RootUrl};
    use tempfile::TempDir;

    #[test]
    fn missing_state_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let state = LibraryState::load(&LibraryState::path_for(dir.path())).unwrap();
        assert!(state.modules.is_empty());
    }

    #[test]
    fn saved_state_reloads_identically() {
        let dir = TempDir::new().unwrap();
        let path = LibraryState::path_for(dir.path());
        let mut state = LibraryState {
            project: "demo".into(),
            ..Default::default()
        };
        state.modules.insert(
            "app".into(),
            vec![LibraryEntry {
                id: LibraryId::new_v4(),
                name: "<JavaScript metadata library>".into(),
                roots: LibraryRoots {
                    classes: [RootUrl::new("/lib/foo.jar!/")].into_iter().collect(),
                    sources: Default::default(),
                },
            }],
        );
        state.save(&path).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(LibraryState::load(&path).unwrap(), state);
    }

    #[test]
    fn corrupt_state_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = LibraryState::path_for(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            LibraryState::load(&path),
            Err(ManifestError::State(_))
        ));
    }
}
