//! Kernel inotify source.
//!
//! One inotify instance per watched root. Directory watches report
//! structural events for their children, file watches report write
//! completion, and neither follows symlinks.

use super::{EntryKind, RawMask, SourceEvent, WatchSource};
use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use std::ffi::OsStr;
use std::io;
use std::path::Path;

/// Read buffer size; fits a few hundred events with short names.
const BUFFER_SIZE: usize = 64 * 1024;

pub struct InotifySource {
    inotify: Inotify,
    buffer: Vec<u8>,
}

impl InotifySource {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            inotify: Inotify::init()?,
            buffer: vec![0u8; BUFFER_SIZE],
        })
    }

    /// Kernel mask for a watch: the entry kind's events, never following
    /// symlinks.
    fn watch_mask(kind: EntryKind) -> WatchMask {
        let mask = WatchMask::from_bits_truncate(kind.mask().bits()) | WatchMask::DONT_FOLLOW;
        match kind {
            EntryKind::Directory => mask | WatchMask::ONLYDIR,
            EntryKind::File => mask,
        }
    }

    fn convert(
        wd: WatchDescriptor,
        mask: EventMask,
        name: Option<&OsStr>,
    ) -> SourceEvent<WatchDescriptor> {
        let mask = RawMask::from_bits_truncate(mask.bits());
        SourceEvent {
            handle: (!mask.contains(RawMask::OVERFLOW)).then_some(wd),
            name: name.filter(|n| !n.is_empty()).map(ToOwned::to_owned),
            mask,
        }
    }

    /// Drain whatever is queued without blocking.
    #[cfg(test)]
    pub fn try_read_events(&mut self) -> io::Result<Vec<SourceEvent<WatchDescriptor>>> {
        match self.inotify.read_events(&mut self.buffer) {
            Ok(events) => Ok(events
                .map(|event| Self::convert(event.wd, event.mask, event.name))
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

impl WatchSource for InotifySource {
    type Handle = WatchDescriptor;

    fn add_watch(&mut self, path: &Path, kind: EntryKind) -> io::Result<WatchDescriptor> {
        self.inotify.watches().add(path, Self::watch_mask(kind))
    }

    fn remove_watch(&mut self, handle: &WatchDescriptor) -> io::Result<()> {
        self.inotify.watches().remove(handle.clone())
    }

    fn read_events(&mut self) -> io::Result<Vec<SourceEvent<WatchDescriptor>>> {
        let events = self.inotify.read_events_blocking(&mut self.buffer)?;
        Ok(events
            .map(|event| Self::convert(event.wd, event.mask, event.name))
            .collect())
    }
}
