//! Polling source built on `notify`'s `PollWatcher`.
//!
//! Each watched directory is polled non-recursively; files are covered by
//! their parent's poll and only tracked here so that mtime changes can be
//! attributed to a file handle. Handles are the watched paths themselves.
//!
//! There are no write markers to see through a poll, so a touch client
//! bumping a file's mtime would look like a modification. Each tracked file
//! keeps a content fingerprint and an mtime change that leaves it unchanged
//! is dropped.

use super::{EntryKind, RawMask, SourceEvent, WatchSource};
use notify::{
    Config, EventKind, PollWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::hash::{DefaultHasher, Hasher};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Registered = Arc<Mutex<HashMap<PathBuf, Tracked>>>;

/// Length and hash of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    hash: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = DefaultHasher::new();
        let mut buf = [0u8; 8192];
        let mut len = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.write(&buf[..n]);
            len += n as u64;
        }
        Ok(Self {
            len,
            hash: hasher.finish(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tracked {
    kind: EntryKind,
    /// Last content seen for a file; `None` for directories or unreadable files.
    fingerprint: Option<Fingerprint>,
}

impl Tracked {
    fn new(path: &Path, kind: EntryKind) -> Self {
        let fingerprint = match kind {
            EntryKind::File => Fingerprint::of(path).ok(),
            EntryKind::Directory => None,
        };
        Self { kind, fingerprint }
    }
}

pub struct PollSource {
    watcher: PollWatcher,
    registered: Registered,
    event_rx: mpsc::UnboundedReceiver<SourceEvent<PathBuf>>,
}

impl PollSource {
    pub fn new(poll_interval: Duration) -> io::Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let registered: Registered = Arc::default();
        let lookup = Arc::clone(&registered);

        let config = Config::default()
            .with_poll_interval(poll_interval)
            .with_compare_contents(false); // Use mtime, not content hashing

        let watcher = PollWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for raw in translate(&event, &mut lookup.lock()) {
                        let _ = event_tx.send(raw);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Poll error");
                }
            },
            config,
        )
        .map_err(io::Error::other)?;

        Ok(Self {
            watcher,
            registered,
            event_rx,
        })
    }

    fn forget(&mut self, path: &Path) {
        let kind = self.registered.lock().remove(path).map(|t| t.kind);
        if kind == Some(EntryKind::Directory) {
            let _ = self.watcher.unwatch(path);
        }
    }

    /// Forget invalidated entries before handing a batch out.
    fn drain(&mut self, first: SourceEvent<PathBuf>) -> Vec<SourceEvent<PathBuf>> {
        let mut events = vec![first];
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }

        for event in &events {
            if event.mask.contains(RawMask::IGNORED) {
                if let Some(path) = &event.handle {
                    self.forget(path);
                }
            }
        }
        events
    }

    /// Drain whatever is queued without blocking.
    #[cfg(test)]
    pub fn try_read_events(&mut self) -> io::Result<Vec<SourceEvent<PathBuf>>> {
        match self.event_rx.try_recv() {
            Ok(first) => Ok(self.drain(first)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(Vec::new()),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "poll watcher stopped",
            )),
        }
    }
}

impl WatchSource for PollSource {
    type Handle = PathBuf;

    fn add_watch(&mut self, path: &Path, kind: EntryKind) -> io::Result<PathBuf> {
        if kind == EntryKind::Directory {
            self.watcher
                .watch(path, RecursiveMode::NonRecursive)
                .map_err(io::Error::other)?;
        }
        let tracked = Tracked::new(path, kind);
        self.registered.lock().insert(path.to_path_buf(), tracked);
        Ok(path.to_path_buf())
    }

    fn remove_watch(&mut self, handle: &PathBuf) -> io::Result<()> {
        let kind = self.registered.lock().remove(handle).map(|t| t.kind);
        match kind {
            Some(EntryKind::Directory) => self.watcher.unwatch(handle).map_err(io::Error::other),
            Some(EntryKind::File) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not watched: {}", handle.display()),
            )),
        }
    }

    fn read_events(&mut self) -> io::Result<Vec<SourceEvent<PathBuf>>> {
        let first = self.event_rx.blocking_recv().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "poll watcher stopped")
        })?;
        Ok(self.drain(first))
    }
}

/// Translate one `notify` event into inotify-shaped source events.
fn translate(
    event: &notify::Event,
    registered: &mut HashMap<PathBuf, Tracked>,
) -> Vec<SourceEvent<PathBuf>> {
    if event.need_rescan() {
        return vec![SourceEvent {
            handle: None,
            name: None,
            mask: RawMask::OVERFLOW,
        }];
    }

    let mut out = Vec::new();
    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                let isdir = if path.is_dir() { RawMask::ISDIR } else { RawMask::empty() };
                out.extend(in_parent(path, registered, RawMask::CREATE | isdir));
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                let own = kind_of(registered, path);
                let isdir = if own == Some(EntryKind::Directory) {
                    RawMask::ISDIR
                } else {
                    RawMask::empty()
                };
                out.extend(in_parent(path, registered, RawMask::DELETE | isdir));
                if own.is_some() {
                    out.push(SourceEvent {
                        handle: Some(path.clone()),
                        name: None,
                        mask: RawMask::IGNORED | isdir,
                    });
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => {
            let masks: &[RawMask] = match mode {
                RenameMode::From => &[RawMask::MOVED_FROM],
                RenameMode::To => &[RawMask::MOVED_TO],
                RenameMode::Both => &[RawMask::MOVED_FROM, RawMask::MOVED_TO],
                _ => &[],
            };
            for (path, mask) in event.paths.iter().zip(masks) {
                let isdir = if path.is_dir() || kind_of(registered, path) == Some(EntryKind::Directory)
                {
                    RawMask::ISDIR
                } else {
                    RawMask::empty()
                };
                out.extend(in_parent(path, registered, *mask | isdir));
            }
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                let Some(tracked) = registered.get_mut(path) else {
                    continue;
                };
                if tracked.kind != EntryKind::File {
                    continue;
                }
                let current = Fingerprint::of(path).ok();
                if current.is_some() && current == tracked.fingerprint {
                    tracing::trace!(path = %path.display(), "Timestamp-only change");
                    continue;
                }
                tracked.fingerprint = current;
                out.push(SourceEvent {
                    handle: Some(path.clone()),
                    name: None,
                    mask: RawMask::MODIFY,
                });
            }
        }
        EventKind::Access(_) | EventKind::Other | EventKind::Any => {}
    }
    out
}

fn kind_of(registered: &HashMap<PathBuf, Tracked>, path: &Path) -> Option<EntryKind> {
    registered.get(path).map(|t| t.kind)
}

/// Event reported by the watch on `path`'s parent directory, if there is one.
fn in_parent(
    path: &Path,
    registered: &HashMap<PathBuf, Tracked>,
    mask: RawMask,
) -> Option<SourceEvent<PathBuf>> {
    let parent = path.parent()?;
    let name: OsString = path.file_name()?.to_owned();
    (kind_of(registered, parent) == Some(EntryKind::Directory)).then(|| SourceEvent {
        handle: Some(parent.to_path_buf()),
        name: Some(name),
        mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag, MetadataKind, RemoveKind};
    use std::fs;
    use std::time::SystemTime;

    fn tracked(kind: EntryKind) -> Tracked {
        Tracked {
            kind,
            fingerprint: None,
        }
    }

    fn registered() -> HashMap<PathBuf, Tracked> {
        HashMap::from([
            (PathBuf::from("/data"), tracked(EntryKind::Directory)),
            (PathBuf::from("/data/a"), tracked(EntryKind::Directory)),
            (PathBuf::from("/data/a/b.txt"), tracked(EntryKind::File)),
        ])
    }

    #[test]
    fn test_create_is_reported_on_parent() {
        let event = notify::Event::new(EventKind::Create(CreateKind::Any))
            .add_path(PathBuf::from("/data/a/new.txt"));
        let out = translate(&event, &mut registered());
        assert_eq!(
            out,
            vec![SourceEvent {
                handle: Some(PathBuf::from("/data/a")),
                name: Some(OsString::from("new.txt")),
                mask: RawMask::CREATE,
            }]
        );
    }

    #[test]
    fn test_remove_of_watched_file_invalidates_it() {
        let event = notify::Event::new(EventKind::Remove(RemoveKind::Any))
            .add_path(PathBuf::from("/data/a/b.txt"));
        let out = translate(&event, &mut registered());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].mask, RawMask::DELETE);
        assert_eq!(out[0].handle, Some(PathBuf::from("/data/a")));
        assert_eq!(out[1].mask, RawMask::IGNORED);
        assert_eq!(out[1].handle, Some(PathBuf::from("/data/a/b.txt")));
    }

    #[test]
    fn test_modify_of_watched_file() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any)))
            .add_path(PathBuf::from("/data/a/b.txt"));
        let out = translate(&event, &mut registered());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mask, RawMask::MODIFY);
        assert_eq!(out[0].name, None);
    }

    #[test]
    fn test_modify_of_directory_is_dropped() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/data/a"));
        assert!(translate(&event, &mut registered()).is_empty());
    }

    #[test]
    fn test_rescan_is_overflow() {
        let event = notify::Event::new(EventKind::Other).set_flag(Flag::Rescan);
        let out = translate(&event, &mut registered());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mask, RawMask::OVERFLOW);
        assert_eq!(out[0].handle, None);
    }

    #[test]
    fn test_poll_source_reports_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = PollSource::new(Duration::from_millis(50)).unwrap();
        let handle = source.add_watch(dir.path(), EntryKind::Directory).unwrap();

        fs::write(dir.path().join("fresh.txt"), b"x").unwrap();

        let events = source.read_events().unwrap();
        assert!(events.iter().any(|e| e.handle.as_ref() == Some(&handle)
            && e.mask.contains(RawMask::CREATE)
            && e.name.as_deref() == Some(std::ffi::OsStr::new("fresh.txt"))));
    }

    #[test]
    fn test_timestamp_only_change_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.txt");
        fs::write(&path, b"hello").unwrap();
        let mut registered = HashMap::from([(path.clone(), Tracked::new(&path, EntryKind::File))]);
        let mtime_bump = notify::Event::new(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::WriteTime,
        )))
        .add_path(path.clone());

        // A touch: new mtime, same bytes.
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10)).unwrap();
        assert!(translate(&mtime_bump, &mut registered).is_empty());

        fs::write(&path, b"hello, world").unwrap();
        let out = translate(&mtime_bump, &mut registered);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mask, RawMask::MODIFY);

        // The new content is now the baseline.
        assert!(translate(&mtime_bump, &mut registered).is_empty());
    }

    #[test]
    fn test_same_length_rewrite_is_a_modification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.txt");
        fs::write(&path, b"aaaa").unwrap();
        let mut registered = HashMap::from([(path.clone(), Tracked::new(&path, EntryKind::File))]);

        fs::write(&path, b"bbbb").unwrap();
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.clone());
        assert_eq!(translate(&event, &mut registered).len(), 1);
    }
}
