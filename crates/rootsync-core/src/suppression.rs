use std::sync::atomic::{AtomicUsize, Ordering};

/// Feedback-loop guard shared by the reconciler and the event gate.
///
/// The reconciler holds a [`SuppressionGuard`] while its own commit is applied;
/// the gate drops change notifications for as long as any guard is alive.
#[derive(Debug, Default)]
pub struct Suppression {
    active: AtomicUsize,
}

impl Suppression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> SuppressionGuard<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        SuppressionGuard { source: self }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }
}

#[must_use = "suppression ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SuppressionGuard<'a> {
    source: &'a Suppression,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        self.source.active.fetch_sub(1, Ordering::SeqCst);
    }
}
