use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use rootsync_core::{RootsChangedEvent, RootsListener, SubscriptionId};

/// Subscribers to roots-changed notifications of one project.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: DashMap<SubscriptionId, Arc<dyn RootsListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn RootsListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver on the calling thread. Listeners are collected first so a
    /// listener may (un)subscribe while being notified.
    pub fn notify(&self, event: &RootsChangedEvent) {
        let listeners: Vec<Arc<dyn RootsListener>> =
            self.listeners.iter().map(|e| e.value().clone()).collect();
        trace!("delivering {:?} to {} listeners", event.cause, listeners.len());
        for listener in listeners {
            listener.roots_changed(event);
        }
    }
}
