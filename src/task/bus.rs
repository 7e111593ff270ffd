//! Notification bus - payload-free fan-out used to trigger re-rendering.
//!
//! Every state, title or output mutation publishes a tick. Subscribers only learn
//! that *something* changed and re-read task snapshots themselves, so missed or
//! coalesced ticks are harmless: a lagged receiver simply redraws once.

use crate::env::limits::BUS_CAPACITY;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Broadcast signal shared by a task list, its nodes and any nested lists.
#[derive(Clone, Debug)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    tx: broadcast::Sender<()>,
    forwards: RwLock<Vec<NotificationBus>>,
}

impl NotificationBus {
    /// Create a new bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    /// Create a new bus with an explicit channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                tx,
                forwards: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Notify every current subscriber, then every bus this one forwards into.
    pub fn publish(&self) {
        // No receiver is not an error, the render loop may not be running.
        let _ = self.inner.tx.send(());

        let forwards = match self.inner.forwards.read() {
            Ok(forwards) => forwards.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for target in &forwards {
            target.publish();
        }
    }

    /// Subscribe to future ticks.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.tx.subscribe()
    }

    /// Forward every tick published here into `parent` as well.
    ///
    /// Used by nested task lists so a single render loop serves the whole tree.
    pub fn forward_to(&self, parent: &NotificationBus) {
        if self.ptr_eq(parent) {
            return;
        }

        let mut forwards = match self.inner.forwards.write() {
            Ok(forwards) => forwards,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !forwards.iter().any(|existing| existing.ptr_eq(parent)) {
            forwards.push(parent.clone());
        }
    }

    /// Number of live subscribers on this bus.
    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    /// Whether both handles point at the same bus.
    pub fn ptr_eq(&self, other: &NotificationBus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
