use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use rootsync_core::{LibraryRoots, RootUrl};

use crate::ScanResult;

/// Desired roots of the managed library for one module, computed fresh on every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub classes: BTreeSet<RootUrl>,
    pub sources: BTreeSet<RootUrl>,
}

impl ChangeSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sources without classes mean nothing to the managed library, so they
    /// collapse to the empty state.
    pub fn from_scan(scan: ScanResult) -> Self {
        if scan.classes.is_empty() {
            return Self::empty();
        }
        Self {
            classes: scan.classes.into_iter().collect(),
            sources: scan.sources.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn matches(&self, current: &LibraryRoots) -> bool {
        self.classes == current.classes && self.sources == current.sources
    }

    pub fn into_roots(self) -> LibraryRoots {
        LibraryRoots {
            classes: self.classes,
            sources: self.sources,
        }
    }
}
