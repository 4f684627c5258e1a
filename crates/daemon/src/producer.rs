//! Per-root event producer.
//!
//! A single pull loop per watched root: wait for raw events, resolve them
//! against the watch tree, classify, keep the tree in step with structural
//! changes, and publish whatever survives. Running the loop on one thread
//! means a new directory's subtree is watched before any later event is
//! looked at.

use crate::classifier::{Classification, PathClassifier, SuppressReason};
use crate::registry::Publisher;
use crate::source::{RawMask, SourceEvent, WatchSource};
use crate::watch_tree::WatchTree;
use nfsnotify_protocol::NormalizedEvent;
use std::io;
use std::thread::JoinHandle;
use std::time::Duration;

/// Back-off after a failed read from the watch source.
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct EventProducer<S: WatchSource> {
    tree: WatchTree<S>,
    classifier: PathClassifier,
    publisher: Publisher,
}

impl<S: WatchSource + 'static> EventProducer<S> {
    /// Run the loop on a dedicated, named thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("producer:{}", self.publisher.root()))
            .spawn(move || self.run())
    }
}

impl<S: WatchSource> EventProducer<S> {
    pub fn new(tree: WatchTree<S>, classifier: PathClassifier, publisher: Publisher) -> Self {
        Self {
            tree,
            classifier,
            publisher,
        }
    }

    /// Run the producer loop. Only returns on process shutdown.
    pub fn run(mut self) {
        tracing::info!(
            root = %self.publisher.root(),
            watches = self.tree.len(),
            "Event producer started"
        );

        loop {
            match self.tree.source_mut().read_events() {
                Ok(batch) => {
                    self.process_batch(batch);
                }
                Err(e) => {
                    tracing::error!(
                        root = %self.publisher.root(),
                        error = %e,
                        "Failed to read filesystem events"
                    );
                    std::thread::sleep(READ_RETRY_DELAY);
                }
            }
        }
    }

    /// Handle a batch in delivery order, returning what was published.
    pub fn process_batch(&mut self, batch: Vec<SourceEvent<S::Handle>>) -> Vec<NormalizedEvent> {
        let published = batch
            .into_iter()
            .filter_map(|event| self.handle_event(event))
            .collect();
        self.tree.flush_detached();
        published
    }

    fn handle_event(&mut self, event: SourceEvent<S::Handle>) -> Option<NormalizedEvent> {
        if event.mask.contains(RawMask::OVERFLOW) {
            // Full resync is out of scope: changes in the lost window are
            // not propagated.
            tracing::error!(
                root = %self.publisher.root(),
                "Event queue overflowed, some changes may not be propagated"
            );
            return None;
        }

        let Some(raw) = self.tree.resolve(&event) else {
            tracing::trace!(handle = ?event.handle, mask = ?event.mask, "Event for a removed watch");
            return None;
        };
        tracing::trace!(path = %raw.path.display(), mask = ?raw.mask, "Received event");

        if raw.mask.contains(RawMask::IGNORED) {
            if let Some(handle) = &event.handle {
                self.tree.forget(handle);
            }
            return None;
        }

        let classification = self.classifier.classify(&raw);

        if raw.is_structural()
            && classification != Classification::Suppress(SuppressReason::MarkerEntry)
        {
            self.tree.on_structural_event(&raw);
        }

        match classification {
            Classification::Emit(normalized) => {
                let delivered = self.publisher.publish(&normalized);
                tracing::info!(
                    root = %self.publisher.root(),
                    kind = %normalized.kind(),
                    path = %normalized.relative_path(),
                    subscribers = delivered,
                    "Touch"
                );
                Some(normalized)
            }
            Classification::Suppress(reason) => {
                tracing::debug!(path = %raw.path.display(), reason = ?reason, "Suppressed event");
                None
            }
        }
    }
}
