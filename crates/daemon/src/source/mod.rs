//! Filesystem watch sources.
//!
//! A [`WatchSource`] installs per-entry watches and hands back batches of raw
//! events. The [`WatchTree`](crate::watch_tree::WatchTree) owns the mapping
//! from handles to paths; sources only know handles.

#[cfg(target_os = "linux")]
pub mod inotify;
pub mod poll;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::hash::Hash;
use std::io;
use std::path::Path;

bitflags! {
    /// Raw event mask flags.
    ///
    /// Bit values match the kernel's inotify mask values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RawMask: u32 {
        /// File was modified.
        const MODIFY = 0x0000_0002;
        /// Writable file was closed.
        const CLOSE_WRITE = 0x0000_0008;
        /// File/directory moved out of watched directory.
        const MOVED_FROM = 0x0000_0040;
        /// File/directory moved into watched directory.
        const MOVED_TO = 0x0000_0080;
        /// File/directory created in watched directory.
        const CREATE = 0x0000_0100;
        /// File/directory deleted from watched directory.
        const DELETE = 0x0000_0200;
        /// Event queue overflowed.
        const OVERFLOW = 0x0000_4000;
        /// Watch was removed (explicitly or automatically).
        const IGNORED = 0x0000_8000;
        /// Subject of event is a directory.
        const ISDIR = 0x4000_0000;

        /// Events that change a directory listing.
        const STRUCTURAL = Self::CREATE.bits()
            | Self::DELETE.bits()
            | Self::MOVED_FROM.bits()
            | Self::MOVED_TO.bits();
        /// Events that change file contents.
        const CONTENT = Self::MODIFY.bits() | Self::CLOSE_WRITE.bits();
        /// Events that bring a new entry into a directory.
        const APPEARED = Self::CREATE.bits() | Self::MOVED_TO.bits();
        /// Events that take an entry out of a directory.
        const VANISHED = Self::DELETE.bits() | Self::MOVED_FROM.bits();
    }
}

/// Kind of entry a watch is installed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Watched for create/delete/move of children.
    Directory,
    /// Watched for write completion.
    File,
}

impl EntryKind {
    /// Mask of events this kind of watch reports.
    #[must_use]
    pub fn mask(self) -> RawMask {
        match self {
            Self::Directory => RawMask::STRUCTURAL,
            Self::File => RawMask::CLOSE_WRITE,
        }
    }
}

/// An event as reported by a source, before path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent<H> {
    /// Watch that reported the event; `None` for queue-wide events (overflow).
    pub handle: Option<H>,
    /// Child name for events reported by a directory watch.
    pub name: Option<OsString>,
    pub mask: RawMask,
}

/// An OS facility that reports events for individually watched entries.
pub trait WatchSource: Send {
    /// Opaque watch identifier.
    type Handle: Clone + Eq + Hash + fmt::Debug + Send;

    /// Start watching a single entry.
    ///
    /// Adding an entry that is already watched (e.g. the same inode under a
    /// new name) may return the existing handle.
    fn add_watch(&mut self, path: &Path, kind: EntryKind) -> io::Result<Self::Handle>;

    /// Stop watching an entry.
    fn remove_watch(&mut self, handle: &Self::Handle) -> io::Result<()>;

    /// Block until at least one event is available and return all pending
    /// events in delivery order.
    fn read_events(&mut self) -> io::Result<Vec<SourceEvent<Self::Handle>>>;
}

/// Which [`WatchSource`] implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Kernel inotify (Linux).
    #[default]
    Inotify,
    /// mtime polling through `notify::PollWatcher`.
    Poll,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inotify => f.write_str("inotify"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inotify" => Ok(Self::Inotify),
            "poll" => Ok(Self::Poll),
            other => Err(format!(
                "unknown backend {other:?} (expected \"inotify\" or \"poll\")"
            )),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_masks() {
        assert_eq!(EntryKind::Directory.mask(), RawMask::STRUCTURAL);
        assert!(EntryKind::File.mask().contains(RawMask::CLOSE_WRITE));
        assert!(!EntryKind::File.mask().intersects(RawMask::STRUCTURAL));
    }

    #[test]
    fn test_mask_groups() {
        assert!(RawMask::STRUCTURAL.contains(RawMask::APPEARED | RawMask::VANISHED));
        assert!(!RawMask::CONTENT.intersects(RawMask::STRUCTURAL));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("poll".parse::<Backend>().unwrap(), Backend::Poll);
        assert_eq!(Backend::default(), Backend::Inotify);
        assert!("fanotify".parse::<Backend>().is_err());
    }
}
