use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ModuleOutcome;

/// Counters shared by the reconciler and the event gate.
#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    passes: AtomicU64,
    failed_passes: AtomicU64,
    created: AtomicU64,
    updated: AtomicU64,
    removed: AtomicU64,
    unchanged: AtomicU64,
    skipped: AtomicU64,
    abandoned: AtomicU64,
    failed: AtomicU64,
    scheduled: AtomicU64,
    coalesced: AtomicU64,
    suppressed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub passes: u64,
    pub failed_passes: u64,
    pub commits: u64,
    pub created: u64,
    pub updated: u64,
    pub removed: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub abandoned: u64,
    pub failed: u64,
    pub scheduled: u64,
    pub coalesced: u64,
    pub suppressed: u64,
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_pass(&self) {
        self.failed_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: ModuleOutcome) {
        let counter = match outcome {
            ModuleOutcome::Created => &self.created,
            ModuleOutcome::Updated => &self.updated,
            ModuleOutcome::Removed => &self.removed,
            ModuleOutcome::Unchanged => &self.unchanged,
            ModuleOutcome::Skipped => &self.skipped,
            ModuleOutcome::Abandoned => &self.abandoned,
            ModuleOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let created = self.created.load(Ordering::Relaxed);
        let updated = self.updated.load(Ordering::Relaxed);
        let removed = self.removed.load(Ordering::Relaxed);
        MetricsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            failed_passes: self.failed_passes.load(Ordering::Relaxed),
            commits: created + updated + removed,
            created,
            updated,
            removed,
            unchanged: self.unchanged.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}
