use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use rootsync_core::{LibraryDependency, ModuleKind, RootUrl};

pub const MANIFEST_FILE: &str = "rootsync.toml";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid manifest: {0}")]
    Invalid(String),

    #[error("Library state error: {0}")]
    State(#[from] serde_json::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// `rootsync.toml`: the project and its modules with their library dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub project: ProjectSection,

    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSection {
    pub name: String,

    #[serde(default = "default_kind")]
    pub kind: ModuleKind,

    #[serde(default = "default_true")]
    pub metadata_target: bool,

    #[serde(default, rename = "library")]
    pub libraries: Vec<LibrarySection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibrarySection {
    pub name: String,

    #[serde(default)]
    pub classes: Vec<String>,

    #[serde(default)]
    pub sources: Vec<String>,
}

fn default_kind() -> ModuleKind {
    ModuleKind::Java
}

fn default_true() -> bool {
    true
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest = content.parse()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.project.name.trim().is_empty() {
            return Err(ManifestError::Invalid(
                "project.name must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.name.trim().is_empty() {
                return Err(ManifestError::Invalid(
                    "module name must not be empty".to_string(),
                ));
            }
            if !seen.insert(module.name.as_str()) {
                return Err(ManifestError::Invalid(format!(
                    "module {} declared twice",
                    module.name
                )));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let manifest: Manifest = toml::from_str(s)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

impl ModuleSection {
    /// Dependencies with relative root paths resolved against `base`.
    pub fn dependencies(&self, base: &Path) -> Vec<LibraryDependency> {
        self.libraries
            .iter()
            .map(|lib| LibraryDependency {
                name: lib.name.clone(),
                classes: lib.classes.iter().map(|r| resolve_root(base, r)).collect(),
                sources: lib.sources.iter().map(|r| resolve_root(base, r)).collect(),
            })
            .collect()
    }
}

fn resolve_root(base: &Path, root: &str) -> RootUrl {
    if root.contains("://") || Path::new(root).is_absolute() {
        return RootUrl::new(root);
    }
    RootUrl::new(base.join(root).to_string_lossy())
}
