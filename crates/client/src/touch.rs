//! Local touch operations.
//!
//! A file touch is bracketed by a write marker so the watcher on the other
//! side of the mount recognizes the resulting write-close as its own. A
//! directory touch creates and removes a dummy entry, whose events the
//! watcher drops by name.

use nfsnotify_protocol::{EventKind, MarkerConvention, NormalizedEvent};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TouchError {
    #[error("refusing path outside the local root: {0}")]
    OutsideRoot(String),

    #[error("cannot create marker {path}: {source}")]
    CreateMarker { path: PathBuf, source: io::Error },

    #[error("cannot touch {path}: {source}")]
    Touch { path: PathBuf, source: io::Error },

    #[error("cannot remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

/// Applies received events under a local mount point.
#[derive(Debug, Clone)]
pub struct Toucher {
    local_root: PathBuf,
    markers: MarkerConvention,
}

impl Toucher {
    pub fn new(local_root: impl Into<PathBuf>, markers: MarkerConvention) -> Self {
        Self {
            local_root: local_root.into(),
            markers,
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Touch the local counterpart of `event`, returning the touched path.
    pub fn apply(&self, event: &NormalizedEvent) -> Result<PathBuf, TouchError> {
        let path = event
            .resolve_under(&self.local_root)
            .ok_or_else(|| TouchError::OutsideRoot(event.relative_path().to_string()))?;
        match event.kind() {
            EventKind::File => self.touch_file(&path)?,
            EventKind::Directory => self.touch_directory(&path)?,
        }
        Ok(path)
    }

    /// Bump the modification time of an existing file.
    ///
    /// The marker is removed even when the touch itself fails.
    pub fn touch_file(&self, path: &Path) -> Result<(), TouchError> {
        let marker = self.markers.write_marker_for(path);
        tracing::debug!(marker = %marker.display(), "Creating write marker");
        File::create(&marker).map_err(|source| TouchError::CreateMarker {
            path: marker.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "Touching file");
        let touched = bump_mtime(path).map_err(|source| TouchError::Touch {
            path: path.to_path_buf(),
            source,
        });

        tracing::debug!(marker = %marker.display(), "Removing write marker");
        let removed = fs::remove_file(&marker).map_err(|source| TouchError::Remove {
            path: marker.clone(),
            source,
        });

        touched.and(removed)
    }

    /// Change a directory's listing by creating and removing a dummy entry.
    pub fn touch_directory(&self, directory: &Path) -> Result<(), TouchError> {
        let dummy = self.markers.dummy_in(directory);
        tracing::debug!(dummy = %dummy.display(), "Creating dummy file");
        File::create(&dummy).map_err(|source| TouchError::Touch {
            path: directory.to_path_buf(),
            source,
        })?;
        fs::remove_file(&dummy).map_err(|source| TouchError::Remove {
            path: dummy.clone(),
            source,
        })
    }
}

/// Open for writing without truncating and set the mtime to now, so the
/// close is a write-close with unchanged contents.
fn bump_mtime(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_modified(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn toucher(root: &Path) -> Toucher {
        Toucher::new(root, MarkerConvention::STANDARD)
    }

    #[test]
    fn test_touch_file_updates_mtime_and_keeps_contents() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("b.txt");
        fs::write(&path, b"contents").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        toucher(root.path()).touch_file(&path).unwrap();

        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(modified > old + Duration::from_secs(60));
        assert_eq!(fs::read(&path).unwrap(), b"contents");
        assert!(!root.path().join("b.txt.ignore-write.marker").exists());
    }

    #[test]
    fn test_touch_missing_file_removes_marker() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("gone.txt");

        let err = toucher(root.path()).touch_file(&path).unwrap_err();

        assert!(matches!(err, TouchError::Touch { .. }));
        assert!(!path.exists());
        assert!(!root.path().join("gone.txt.ignore-write.marker").exists());
    }

    #[test]
    fn test_touch_directory_leaves_no_dummy() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();

        toucher(root.path())
            .touch_directory(&root.path().join("a"))
            .unwrap();

        assert_eq!(fs::read_dir(root.path().join("a")).unwrap().count(), 0);
    }

    #[test]
    fn test_touch_missing_directory_fails() {
        let root = tempfile::tempdir().unwrap();
        let err = toucher(root.path())
            .touch_directory(&root.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, TouchError::Touch { .. }));
    }

    #[test]
    fn test_legacy_marker_names() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("b.txt");
        fs::write(&path, b"").unwrap();

        Toucher::new(root.path(), MarkerConvention::LEGACY)
            .touch_file(&path)
            .unwrap();

        let names: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["b.txt"]);
    }

    #[test]
    fn test_apply_resolves_under_local_root() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        fs::write(root.path().join("a/b.txt"), b"").unwrap();
        let toucher = toucher(root.path());

        let file = NormalizedEvent::file("a/b.txt").unwrap();
        assert_eq!(toucher.apply(&file).unwrap(), root.path().join("a/b.txt"));

        let top = NormalizedEvent::directory(".").unwrap();
        assert!(toucher.apply(&top).is_ok());
    }

    #[test]
    fn test_apply_rejects_escaping_paths() {
        let root = tempfile::tempdir().unwrap();
        let toucher = toucher(root.path());

        for path in ["../etc", "a/../../b", "/etc/passwd"] {
            let event = NormalizedEvent::directory(path).unwrap();
            assert!(
                matches!(toucher.apply(&event), Err(TouchError::OutsideRoot(_))),
                "{path}"
            );
        }
    }
}
