//! Normalized change events and their line encoding.
//!
//! A [`NormalizedEvent`] is the only unit that crosses the network. On the
//! wire it is a single line: `<kind> <relative-path>\n`.

use crate::message::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Relative path used for the watched root itself.
pub const ROOT_RELATIVE_PATH: &str = ".";

/// What the remote side has to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// File contents changed: bump the file's timestamps.
    File,
    /// Directory listing changed: force a listing revalidation.
    Directory,
}

impl EventKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "directory" => Ok(Self::Directory),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

/// A change relative to a watched root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedEvent {
    kind: EventKind,
    relative_path: String,
}

impl NormalizedEvent {
    /// Create an event, validating that the path can be carried on one line.
    pub fn new(kind: EventKind, relative_path: impl Into<String>) -> Result<Self, ProtocolError> {
        let relative_path = relative_path.into();
        if relative_path.is_empty() {
            return Err(ProtocolError::EmptyPath);
        }
        if relative_path.contains(['\n', '\r']) {
            return Err(ProtocolError::InvalidPath(relative_path));
        }
        Ok(Self {
            kind,
            relative_path,
        })
    }

    /// Shorthand for a `file` event.
    pub fn file(relative_path: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::new(EventKind::File, relative_path)
    }

    /// Shorthand for a `directory` event.
    pub fn directory(relative_path: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::new(EventKind::Directory, relative_path)
    }

    /// Build an event from a path relative to the root.
    ///
    /// An empty relative path names the root itself and becomes `.`.
    pub fn from_relative(kind: EventKind, relative: &Path) -> Result<Self, ProtocolError> {
        if relative.as_os_str().is_empty() {
            return Self::new(kind, ROOT_RELATIVE_PATH);
        }
        let text = relative
            .to_str()
            .ok_or_else(|| ProtocolError::InvalidPath(relative.to_string_lossy().into_owned()))?;
        Self::new(kind, text)
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Resolve this event's path under a local root.
    ///
    /// Returns `None` if the relative path would escape the root
    /// (absolute paths or `..` components).
    #[must_use]
    pub fn resolve_under(&self, local_root: &Path) -> Option<PathBuf> {
        use std::path::Component;

        let relative = Path::new(&self.relative_path);
        let mut resolved = local_root.to_path_buf();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }

    /// Encode as a newline-terminated wire line.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{} {}\n", self.kind, self.relative_path)
    }

    /// Parse a wire line (with or without the trailing newline).
    ///
    /// The path is everything after the first space, so paths containing
    /// spaces survive the round trip.
    pub fn parse_line(line: &str) -> Result<Self, ProtocolError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (kind, path) = line
            .split_once(' ')
            .ok_or_else(|| ProtocolError::MalformedLine(line.to_string()))?;
        Self::new(kind.parse()?, path)
    }
}

impl fmt::Display for NormalizedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.relative_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(EventKind::File.as_str(), "file");
        assert_eq!(EventKind::Directory.to_string(), "directory");
        assert_eq!("directory".parse::<EventKind>().unwrap(), EventKind::Directory);
        assert!(matches!(
            "symlink".parse::<EventKind>(),
            Err(ProtocolError::UnknownKind(k)) if k == "symlink"
        ));
    }

    #[test]
    fn test_to_line() {
        let event = NormalizedEvent::file("a/b.txt").unwrap();
        assert_eq!(event.to_line(), "file a/b.txt\n");
    }

    #[test]
    fn test_parse_line_keeps_spaces_in_path() {
        let event = NormalizedEvent::parse_line("file my docs/notes 1.txt\n").unwrap();
        assert_eq!(event.kind(), EventKind::File);
        assert_eq!(event.relative_path(), "my docs/notes 1.txt");
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(matches!(
            NormalizedEvent::parse_line("nonsense"),
            Err(ProtocolError::MalformedLine(_))
        ));
        assert!(matches!(
            NormalizedEvent::parse_line("directory \n"),
            Err(ProtocolError::EmptyPath)
        ));
    }

    #[test]
    fn test_new_rejects_newlines() {
        assert!(NormalizedEvent::file("a\nb").is_err());
        assert!(NormalizedEvent::file("").is_err());
    }

    #[test]
    fn test_from_relative_root_is_dot() {
        let event = NormalizedEvent::from_relative(EventKind::Directory, Path::new("")).unwrap();
        assert_eq!(event.relative_path(), ROOT_RELATIVE_PATH);
    }

    #[test]
    fn test_resolve_under() {
        let root = Path::new("/mnt/data");
        let event = NormalizedEvent::directory(".").unwrap();
        assert_eq!(event.resolve_under(root), Some(PathBuf::from("/mnt/data")));

        let event = NormalizedEvent::file("a/b.txt").unwrap();
        assert_eq!(
            event.resolve_under(root),
            Some(PathBuf::from("/mnt/data/a/b.txt"))
        );

        assert_eq!(NormalizedEvent::file("../etc/passwd").unwrap().resolve_under(root), None);
        assert_eq!(NormalizedEvent::file("/etc/passwd").unwrap().resolve_under(root), None);
    }
}
