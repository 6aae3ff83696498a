use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Marks "enter archive" in a root identifier: `/lib/foo.jar!/` is the root inside `foo.jar`.
pub const ARCHIVE_SEPARATOR: &str = "!/";

const URL_SCHEMES: [&str; 2] = ["file://", "jar://"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ModuleKind {
    Java,
    Web,
    Plugin,
    Other(String),
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleKind::Java => "java",
            ModuleKind::Web => "web",
            ModuleKind::Plugin => "plugin",
            ModuleKind::Other(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "java" | "java_module" => Ok(ModuleKind::Java),
            "web" | "web_module" => Ok(ModuleKind::Web),
            "plugin" | "plugin_module" => Ok(ModuleKind::Plugin),
            other => Ok(ModuleKind::Other(other.to_string())),
        }
    }
}

impl From<String> for ModuleKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(_) => ModuleKind::Other(s),
        }
    }
}

impl From<ModuleKind> for String {
    fn from(kind: ModuleKind) -> Self {
        kind.to_string()
    }
}

/// Identifier of a classpath or source root, e.g. `file:///lib/foo.jar` or `/lib/foo.jar!/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootUrl(String);

impl RootUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local filesystem path behind this root: scheme and archive separator stripped.
    pub fn local_path(&self) -> PathBuf {
        let mut s = self.0.as_str();
        for scheme in URL_SCHEMES {
            if let Some(rest) = s.strip_prefix(scheme) {
                s = rest;
                break;
            }
        }
        if let Some(idx) = s.find(ARCHIVE_SEPARATOR) {
            s = &s[..idx];
        }
        PathBuf::from(s)
    }

    /// Root identifier for the contents of the archive at `path`.
    pub fn archive_root(path: &std::path::Path) -> Self {
        let mut s = path.to_string_lossy().to_string();
        if let Some(idx) = s.find(ARCHIVE_SEPARATOR) {
            s.truncate(idx);
        }
        s.push_str(ARCHIVE_SEPARATOR);
        Self(s)
    }

    pub fn is_archive_root(&self) -> bool {
        self.0.ends_with(ARCHIVE_SEPARATOR)
    }
}

impl fmt::Display for RootUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RootUrl {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RootUrl {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootKind {
    Classes,
    Sources,
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootKind::Classes => write!(f, "classes"),
            RootKind::Sources => write!(f, "sources"),
        }
    }
}

/// A library declared on a module by the project model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDependency {
    pub name: String,
    #[serde(default)]
    pub classes: Vec<RootUrl>,
    #[serde(default)]
    pub sources: Vec<RootUrl>,
}

impl LibraryDependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn with_class_root(mut self, root: impl Into<RootUrl>) -> Self {
        self.classes.push(root.into());
        self
    }

    pub fn with_source_root(mut self, root: impl Into<RootUrl>) -> Self {
        self.sources.push(root.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryId(Uuid);

impl LibraryId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryHandle {
    pub id: LibraryId,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryRoots {
    #[serde(default)]
    pub classes: BTreeSet<RootUrl>,
    #[serde(default)]
    pub sources: BTreeSet<RootUrl>,
}

impl LibraryRoots {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.sources.is_empty()
    }

    pub fn get(&self, kind: RootKind) -> &BTreeSet<RootUrl> {
        match kind {
            RootKind::Classes => &self.classes,
            RootKind::Sources => &self.sources,
        }
    }

    pub fn get_mut(&mut self, kind: RootKind) -> &mut BTreeSet<RootUrl> {
        match kind {
            RootKind::Classes => &mut self.classes,
            RootKind::Sources => &mut self.sources,
        }
    }
}

/// A single primitive applied by a library table inside one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryOp {
    CreateLibrary { id: LibraryId, name: String },
    RemoveLibrary { id: LibraryId },
    AddRoot { id: LibraryId, kind: RootKind, url: RootUrl },
    RemoveRoot { id: LibraryId, kind: RootKind, url: RootUrl },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeCause {
    LibraryTable,
    Dependencies,
    ModuleAdded,
    ModuleRemoved,
}

/// Dependency-graph change notification delivered to `RootsListener`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootsChangedEvent {
    pub module: Option<ModuleId>,
    pub cause: ChangeCause,
}

impl RootsChangedEvent {
    pub fn project_wide(cause: ChangeCause) -> Self {
        Self {
            module: None,
            cause,
        }
    }

    pub fn for_module(module: ModuleId, cause: ChangeCause) -> Self {
        Self {
            module: Some(module),
            cause,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExecutionMode {
    #[default]
    Production,
    UnitTest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn local_path_strips_scheme_and_archive_separator() {
        assert_eq!(
            RootUrl::new("jar:///lib/foo.jar!/").local_path(),
            PathBuf::from("/lib/foo.jar")
        );
        assert_eq!(
            RootUrl::new("file:///lib/foo-src").local_path(),
            PathBuf::from("/lib/foo-src")
        );
        assert_eq!(
            RootUrl::new("/lib/foo.jar").local_path(),
            PathBuf::from("/lib/foo.jar")
        );
    }

    #[test]
    fn archive_root_appends_separator_once() {
        let root = RootUrl::archive_root(Path::new("/lib/foo.jar"));
        assert_eq!(root.as_str(), "/lib/foo.jar!/");
        assert!(root.is_archive_root());

        let again = RootUrl::archive_root(&root.local_path());
        assert_eq!(again, root);
    }

    #[test]
    fn module_kind_parses_known_and_unknown() {
        assert_eq!("JAVA_MODULE".parse::<ModuleKind>().unwrap(), ModuleKind::Java);
        assert_eq!("web".parse::<ModuleKind>().unwrap(), ModuleKind::Web);
        assert_eq!(
            "python".parse::<ModuleKind>().unwrap(),
            ModuleKind::Other("python".into())
        );
        assert_eq!(ModuleKind::Plugin.to_string(), "plugin");
    }

    #[test]
    fn module_kind_serializes_as_string() {
        let json = serde_json::to_string(&ModuleKind::Java).unwrap();
        assert_eq!(json, "\"java\"");
        let back: ModuleKind = serde_json::from_str("\"flutter\"").unwrap();
        assert_eq!(back, ModuleKind::Other("flutter".into()));
    }
}
