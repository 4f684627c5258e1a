//! Per-root subscriber sets.
//!
//! This module manages:
//! - The configured watched roots (fixed for the process lifetime)
//! - One unbounded delivery queue per connected subscriber
//! - Fan-out of every published event to the root's current subscribers

use nfsnotify_protocol::NormalizedEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Unique subscriber identifier
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<NormalizedEvent>,
}

/// Subscribers of one root. The lock serializes subscribe against publish,
/// so a subscriber sees exactly the events published after it was added.
#[derive(Default)]
struct RootSubscribers {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl RootSubscribers {
    fn remove(&self, id: SubscriberId) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}

/// Registry of watched roots and their subscribers.
///
/// Construct one per process and share it by `Arc` between the producers and
/// the server.
pub struct SubscriptionRegistry {
    roots: HashMap<String, Arc<RootSubscribers>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new<I, R>(roots: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            roots: roots
                .into_iter()
                .map(|root| (root.into(), Arc::default()))
                .collect(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a new empty queue to `root`'s subscriber set.
    ///
    /// Returns `None` for roots that are not configured.
    pub fn subscribe(&self, root: &str) -> Option<Subscription> {
        let set = self.roots.get(root)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        set.subscribers.lock().push(Subscriber { id, tx });
        tracing::debug!(root = root, subscriber_id = id, "Subscribed");
        Some(Subscription {
            id,
            root: root.to_string(),
            rx,
            set: Arc::clone(set),
        })
    }

    /// Append `event` to every queue of `root`.
    ///
    /// Never blocks on a subscriber. Queues whose connection is gone are
    /// pruned. Returns the number of queues the event was delivered to.
    pub fn publish(&self, root: &str, event: &NormalizedEvent) -> usize {
        match self.roots.get(root) {
            Some(set) => publish_to(set, event),
            None => 0,
        }
    }

    /// Handle for the single producer of `root`.
    pub fn publisher(&self, root: &str) -> Option<Publisher> {
        self.roots.get(root).map(|set| Publisher {
            root: root.to_string(),
            set: Arc::clone(set),
        })
    }

    pub fn subscriber_count(&self, root: &str) -> usize {
        self.roots
            .get(root)
            .map(|set| set.subscribers.lock().len())
            .unwrap_or(0)
    }

    /// Registry statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            roots: self.roots.len(),
            subscribers: self
                .roots
                .values()
                .map(|set| set.subscribers.lock().len())
                .sum(),
        }
    }
}

fn publish_to(set: &RootSubscribers, event: &NormalizedEvent) -> usize {
    let mut subscribers = set.subscribers.lock();
    subscribers.retain(|s| s.tx.send(event.clone()).is_ok());
    subscribers.len()
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub roots: usize,
    pub subscribers: usize,
}

/// Publishing side of one root, owned by its producer.
///
/// Dropping it (producer shutdown) closes every queue of the root, which
/// ends the corresponding connections.
pub struct Publisher {
    root: String,
    set: Arc<RootSubscribers>,
}

impl Publisher {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn publish(&self, event: &NormalizedEvent) -> usize {
        publish_to(&self.set, event)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let closed = std::mem::take(&mut *self.set.subscribers.lock());
        if !closed.is_empty() {
            tracing::info!(
                root = %self.root,
                subscribers = closed.len(),
                "Producer stopped, closing subscriber queues"
            );
        }
    }
}

/// One subscriber's queue. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    root: String,
    rx: mpsc::UnboundedReceiver<NormalizedEvent>,
    set: Arc<RootSubscribers>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Next event, or `None` once the root's producer has shut down.
    pub async fn recv(&mut self) -> Option<NormalizedEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<NormalizedEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.set.remove(self.id);
        tracing::debug!(root = %self.root, subscriber_id = self.id, "Unsubscribed");
    }
}
