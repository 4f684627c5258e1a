//! Watch index for one watched root.
//!
//! Keeps exactly one watch per reachable entry. The index is owned by the
//! root's producer thread, so installs, removals and event resolution never
//! race with each other.

use crate::classifier::RawEvent;
use crate::source::{EntryKind, RawMask, SourceEvent, WatchSource};
use nfsnotify_protocol::MarkerConvention;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot watch root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("root {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// A single installed watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub path: PathBuf,
    pub kind: EntryKind,
}

pub struct WatchTree<S: WatchSource> {
    root: PathBuf,
    source: S,
    markers: MarkerConvention,
    by_path: HashMap<PathBuf, S::Handle>,
    by_handle: HashMap<S::Handle, Watch>,
    /// Watches of moved-away subtrees, kept until the end of the batch so a
    /// matching move-in can re-map them.
    detached: Vec<(PathBuf, S::Handle)>,
}

impl<S: WatchSource> WatchTree<S> {
    pub fn new(root: impl Into<PathBuf>, source: S, markers: MarkerConvention) -> Self {
        Self {
            root: root.into(),
            source,
            markers,
            by_path: HashMap::new(),
            by_handle: HashMap::new(),
            detached: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn watch_at(&self, path: &Path) -> Option<&Watch> {
        self.by_path.get(path).and_then(|h| self.by_handle.get(h))
    }

    /// Watch the root and everything below it.
    ///
    /// Unlike later installs, a failure on the root itself is an error.
    pub fn install_root(&mut self) -> Result<usize, WatchError> {
        let root = self.root.clone();
        let metadata = root.metadata().map_err(|source| WatchError::Root {
            path: root.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(WatchError::NotADirectory(root));
        }
        self.add(&root, EntryKind::Directory)
            .map_err(|source| WatchError::Root {
                path: root.clone(),
                source,
            })?;
        let count = 1 + self.install_below(&root);
        tracing::info!(root = %root.display(), watches = count, "Watch tree installed");
        Ok(count)
    }

    /// Watch `path` and, if it is a directory, its whole subtree.
    ///
    /// Entries that vanish or cannot be watched are skipped; the number of
    /// watches installed is returned.
    pub fn install_recursive(&mut self, path: &Path) -> usize {
        let Ok(metadata) = path.symlink_metadata() else {
            tracing::debug!(path = %path.display(), "Entry vanished before it could be watched");
            return 0;
        };
        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        if let Err(e) = self.add(path, kind) {
            tracing::debug!(path = %path.display(), error = %e, "Failed to add watch");
            return 0;
        }
        if kind == EntryKind::Directory {
            1 + self.install_below(path)
        } else {
            1
        }
    }

    /// Depth-first, directories before their contents.
    fn install_below(&mut self, dir: &Path) -> usize {
        let mut count = 0;
        let markers = self.markers;
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !markers.is_self_event(entry.path()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping entry during watch install");
                    continue;
                }
            };
            let kind = if entry.file_type().is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            match self.add(entry.path(), kind) {
                Ok(()) => count += 1,
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), error = %e, "Failed to add watch");
                }
            }
        }
        count
    }

    fn add(&mut self, path: &Path, kind: EntryKind) -> io::Result<()> {
        if self.markers.is_self_event(path) {
            return Ok(());
        }
        let handle = self.source.add_watch(path, kind)?;

        // Same inode seen under a new name: the old path is stale.
        if let Some(previous) = self.by_handle.get(&handle) {
            if previous.path != path {
                let stale = previous.path.clone();
                if self.by_path.get(&stale) == Some(&handle) {
                    self.by_path.remove(&stale);
                }
            }
        }
        // Path reused by a new entry before the old watch's invalidation
        // arrived: the old handle no longer owns the path.
        if let Some(old) = self.by_path.insert(path.to_path_buf(), handle.clone()) {
            if old != handle {
                self.by_handle.remove(&old);
                if let Err(e) = self.source.remove_watch(&old) {
                    tracing::trace!(handle = ?old, error = %e, "Stale watch already gone");
                }
            }
        }

        tracing::trace!(path = %path.display(), kind = ?kind, "Add watch");
        self.by_handle.insert(
            handle,
            Watch {
                path: path.to_path_buf(),
                kind,
            },
        );
        Ok(())
    }

    /// Remove the watch on `path` and every watch below it.
    pub fn remove_watch(&mut self, path: &Path) -> usize {
        let doomed: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in &doomed {
            if let Some(handle) = self.by_path.remove(p) {
                self.by_handle.remove(&handle);
                // The kernel may have dropped it already.
                if let Err(e) = self.source.remove_watch(&handle) {
                    tracing::trace!(path = %p.display(), error = %e, "Watch already gone");
                }
            }
        }
        if !doomed.is_empty() {
            tracing::debug!(path = %path.display(), removed = doomed.len(), "Removed watches");
        }
        doomed.len()
    }

    /// Drop a watch the OS has already invalidated.
    pub fn forget(&mut self, handle: &S::Handle) -> Option<Watch> {
        let watch = self.by_handle.remove(handle)?;
        if self.by_path.get(&watch.path) == Some(handle) {
            self.by_path.remove(&watch.path);
        }
        tracing::trace!(path = %watch.path.display(), "Watch invalidated");
        Some(watch)
    }

    /// Keep coverage in step with a structural event.
    pub fn on_structural_event(&mut self, event: &RawEvent) {
        if event.mask.intersects(RawMask::APPEARED) {
            let added = self.install_recursive(&event.path);
            tracing::debug!(path = %event.path.display(), added, "Watching new entry");
        } else if event.mask.contains(RawMask::MOVED_FROM) {
            self.detach(&event.path);
        } else if event.mask.intersects(RawMask::VANISHED) {
            self.remove_watch(&event.path);
        }
    }

    /// Mark the watches on `path` and below for removal at the next
    /// [`flush_detached`](Self::flush_detached).
    ///
    /// inotify keeps a watch across a rename, and events may already be
    /// queued on it for the entry's new location.
    fn detach(&mut self, path: &Path) {
        let before = self.detached.len();
        self.detached.extend(
            self.by_path
                .iter()
                .filter(|(p, _)| p.starts_with(path))
                .map(|(p, h)| (p.clone(), h.clone())),
        );
        tracing::trace!(
            path = %path.display(),
            detached = self.detached.len() - before,
            "Detached moved-away watches"
        );
    }

    /// Remove detached watches that no move-in has claimed.
    pub fn flush_detached(&mut self) -> usize {
        let mut removed = 0;
        for (path, handle) in std::mem::take(&mut self.detached) {
            if self.by_path.get(&path) != Some(&handle) {
                // Re-mapped to a new location, or the path was reused.
                continue;
            }
            self.by_path.remove(&path);
            self.by_handle.remove(&handle);
            if let Err(e) = self.source.remove_watch(&handle) {
                tracing::trace!(path = %path.display(), error = %e, "Watch already gone");
            }
            removed += 1;
        }
        if removed > 0 {
            tracing::debug!(removed, "Removed watches of entries moved out of the tree");
        }
        removed
    }

    /// Turn a source event into a path-resolved raw event.
    ///
    /// Returns `None` for events on handles that are no longer indexed.
    pub fn resolve(&self, event: &SourceEvent<S::Handle>) -> Option<RawEvent> {
        let Some(handle) = &event.handle else {
            return Some(RawEvent::new(self.root.clone(), event.mask));
        };
        let watch = self.by_handle.get(handle)?;
        let (path, mask) = match &event.name {
            Some(name) => (watch.path.join(name), event.mask),
            None if watch.kind == EntryKind::Directory => {
                (watch.path.clone(), event.mask | RawMask::ISDIR)
            }
            None => (watch.path.clone(), event.mask),
        };
        Some(RawEvent::new(path, mask))
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
