//! Raw event classification.
//!
//! Decides whether a raw event is one of our own (marker traffic), and if
//! not, which normalized event it becomes. Structural events name the
//! containing directory, because the remote side has to invalidate the
//! directory listing, not the child.

use crate::source::RawMask;
use nfsnotify_protocol::{EventKind, MarkerConvention, NormalizedEvent};
use std::path::PathBuf;

/// A raw event with its path resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Absolute path of the entry the event is about.
    pub path: PathBuf,
    pub is_dir: bool,
    pub mask: RawMask,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, mask: RawMask) -> Self {
        Self {
            path: path.into(),
            is_dir: mask.contains(RawMask::ISDIR),
            mask,
        }
    }

    pub fn is_structural(&self) -> bool {
        self.mask.intersects(RawMask::STRUCTURAL)
    }
}

/// Why an event was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// The entry itself is a marker or dummy file.
    MarkerEntry,
    /// A write marker announced this write-close.
    MarkedWrite,
    /// The OS dropped the watch; only the watch index cares.
    WatchInvalidated,
    /// The OS event queue overflowed.
    Overflow,
    /// Content event on a directory, or no mask bit we act on.
    Irrelevant,
    /// Path is not under the watched root.
    OutsideRoot,
    /// Path cannot be sent as a single UTF-8 line.
    Unrepresentable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Emit(NormalizedEvent),
    Suppress(SuppressReason),
}

/// Classifies raw events for one watched root.
#[derive(Debug, Clone)]
pub struct PathClassifier {
    root: PathBuf,
    markers: MarkerConvention,
}

impl PathClassifier {
    pub fn new(root: impl Into<PathBuf>, markers: MarkerConvention) -> Self {
        Self {
            root: root.into(),
            markers,
        }
    }

    /// Whether the event is caused by a touch client.
    ///
    /// The write marker is checked at classification time. If it is
    /// already gone the event propagates and the remote side gets one
    /// extra touch; a real change is never dropped for a stale marker.
    pub fn is_own_event(&self, event: &RawEvent) -> Option<SuppressReason> {
        if self.markers.is_self_event(&event.path) {
            tracing::trace!(path = %event.path.display(), "Event regarding a marker entry");
            return Some(SuppressReason::MarkerEntry);
        }

        if event.mask.contains(RawMask::CLOSE_WRITE) {
            let marker = self.markers.write_marker_for(&event.path);
            if marker.symlink_metadata().is_ok() {
                tracing::debug!(
                    path = %event.path.display(),
                    "Write-close announced by a write marker"
                );
                return Some(SuppressReason::MarkedWrite);
            }
        }

        None
    }

    pub fn classify(&self, event: &RawEvent) -> Classification {
        if event.mask.contains(RawMask::OVERFLOW) {
            return Classification::Suppress(SuppressReason::Overflow);
        }
        if event.mask.contains(RawMask::IGNORED) {
            return Classification::Suppress(SuppressReason::WatchInvalidated);
        }
        if let Some(reason) = self.is_own_event(event) {
            return Classification::Suppress(reason);
        }

        let (kind, target) = if event.is_structural() {
            match event.path.parent() {
                Some(parent) => (EventKind::Directory, parent),
                None => return Classification::Suppress(SuppressReason::OutsideRoot),
            }
        } else if event.mask.intersects(RawMask::CONTENT) && !event.is_dir {
            (EventKind::File, event.path.as_path())
        } else {
            return Classification::Suppress(SuppressReason::Irrelevant);
        };

        let Ok(relative) = target.strip_prefix(&self.root) else {
            tracing::warn!(
                path = %target.display(),
                root = %self.root.display(),
                "Event outside of watched root"
            );
            return Classification::Suppress(SuppressReason::OutsideRoot);
        };

        match NormalizedEvent::from_relative(kind, relative) {
            Ok(normalized) => Classification::Emit(normalized),
            Err(e) => {
                tracing::warn!(
                    path = %target.display(),
                    error = %e,
                    "Cannot propagate event for this path"
                );
                Classification::Suppress(SuppressReason::Unrepresentable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn classifier(root: &Path) -> PathClassifier {
        PathClassifier::new(root, MarkerConvention::STANDARD)
    }

    fn emitted(c: Classification) -> (EventKind, String) {
        match c {
            Classification::Emit(e) => (e.kind(), e.relative_path().to_string()),
            other => panic!("expected Emit, got {other:?}"),
        }
    }

    #[test]
    fn test_close_write_emits_file() {
        let c = classifier(Path::new("/data"));
        let out = c.classify(&RawEvent::new("/data/a/b.txt", RawMask::CLOSE_WRITE));
        assert_eq!(emitted(out), (EventKind::File, "a/b.txt".to_string()));
    }

    #[test]
    fn test_modify_emits_file() {
        let c = classifier(Path::new("/data"));
        let out = c.classify(&RawEvent::new("/data/b.txt", RawMask::MODIFY));
        assert_eq!(emitted(out), (EventKind::File, "b.txt".to_string()));
    }

    #[test]
    fn test_structural_emits_containing_directory() {
        let c = classifier(Path::new("/data"));
        for mask in [
            RawMask::CREATE,
            RawMask::DELETE,
            RawMask::MOVED_FROM,
            RawMask::MOVED_TO,
            RawMask::CREATE | RawMask::ISDIR,
        ] {
            let out = c.classify(&RawEvent::new("/data/a/b", mask));
            assert_eq!(emitted(out), (EventKind::Directory, "a".to_string()), "{mask:?}");
        }
    }

    #[test]
    fn test_structural_in_root_names_root_as_dot() {
        let c = classifier(Path::new("/data"));
        let out = c.classify(&RawEvent::new("/data/a", RawMask::CREATE | RawMask::ISDIR));
        assert_eq!(emitted(out), (EventKind::Directory, ".".to_string()));
    }

    #[test]
    fn test_invalidation_is_never_forwarded() {
        let c = classifier(Path::new("/data"));
        assert_eq!(
            c.classify(&RawEvent::new("/data/a/b.txt", RawMask::IGNORED)),
            Classification::Suppress(SuppressReason::WatchInvalidated)
        );
        assert_eq!(
            c.classify(&RawEvent::new("/data", RawMask::OVERFLOW)),
            Classification::Suppress(SuppressReason::Overflow)
        );
    }

    #[test]
    fn test_marker_entries_are_suppressed() {
        let c = classifier(Path::new("/data"));
        for path in ["/data/b.txt.ignore-write.marker", "/data/a/.dummy.ignore-write.marker"] {
            for mask in [RawMask::CREATE, RawMask::DELETE, RawMask::CLOSE_WRITE] {
                assert_eq!(
                    c.classify(&RawEvent::new(path, mask)),
                    Classification::Suppress(SuppressReason::MarkerEntry)
                );
            }
        }
    }

    #[test]
    fn test_write_marker_suppresses_close_write() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("b.txt");
        fs::write(&target, b"x").unwrap();
        let c = classifier(dir.path());

        let marker = MarkerConvention::STANDARD.write_marker_for(&target);
        fs::write(&marker, b"").unwrap();
        assert_eq!(
            c.classify(&RawEvent::new(&target, RawMask::CLOSE_WRITE)),
            Classification::Suppress(SuppressReason::MarkedWrite)
        );

        // Marker already removed: the event goes through.
        fs::remove_file(&marker).unwrap();
        let out = c.classify(&RawEvent::new(&target, RawMask::CLOSE_WRITE));
        assert_eq!(emitted(out), (EventKind::File, "b.txt".to_string()));
    }

    #[test]
    fn test_write_marker_does_not_hide_structural_events() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("b.txt");
        fs::write(MarkerConvention::STANDARD.write_marker_for(&target), b"").unwrap();
        let c = classifier(dir.path());

        let out = c.classify(&RawEvent::new(&target, RawMask::DELETE));
        assert_eq!(emitted(out), (EventKind::Directory, ".".to_string()));
    }

    #[test]
    fn test_legacy_markers() {
        let c = PathClassifier::new("/data", MarkerConvention::LEGACY);
        assert_eq!(
            c.classify(&RawEvent::new("/data/.dummy.nfs_inotify", RawMask::CREATE)),
            Classification::Suppress(SuppressReason::MarkerEntry)
        );
        // Standard suffix means nothing under the legacy convention.
        let out = c.classify(&RawEvent::new("/data/x.ignore-write.marker", RawMask::CREATE));
        assert_eq!(emitted(out), (EventKind::Directory, ".".to_string()));
    }

    #[test]
    fn test_user_files_with_marker_extension_propagate() {
        let c = classifier(Path::new("/data"));
        let out = c.classify(&RawEvent::new("/data/slides.marker", RawMask::CLOSE_WRITE));
        assert_eq!(emitted(out), (EventKind::File, "slides.marker".to_string()));

        let out = c.classify(&RawEvent::new("/data/build.marker", RawMask::CREATE));
        assert_eq!(emitted(out), (EventKind::Directory, ".".to_string()));
    }

    #[test]
    fn test_content_event_on_directory_is_irrelevant() {
        let c = classifier(Path::new("/data"));
        assert_eq!(
            c.classify(&RawEvent::new("/data/a", RawMask::MODIFY | RawMask::ISDIR)),
            Classification::Suppress(SuppressReason::Irrelevant)
        );
    }

    #[test]
    fn test_outside_root() {
        let c = classifier(Path::new("/data"));
        assert_eq!(
            c.classify(&RawEvent::new("/elsewhere/x", RawMask::CLOSE_WRITE)),
            Classification::Suppress(SuppressReason::OutsideRoot)
        );
    }

    #[test]
    fn test_newline_in_name_is_unrepresentable() {
        let c = classifier(Path::new("/data"));
        assert_eq!(
            c.classify(&RawEvent::new("/data/evil\nname", RawMask::CLOSE_WRITE)),
            Classification::Suppress(SuppressReason::Unrepresentable)
        );
    }
}
