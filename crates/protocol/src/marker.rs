//! Marker file naming conventions.
//!
//! The touch client leaves short-lived sentinel files next to the entries it
//! touches so that the server can tell its own events from real changes.

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which suffix set both sides agree on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerStyle {
    /// `.ignore-write.marker` markers.
    #[default]
    Standard,
    /// `.ignore_IN_CLOSE_WRITE.nfs_inotify` markers, for older touch clients.
    Legacy,
}

impl MarkerStyle {
    #[must_use]
    pub const fn convention(self) -> MarkerConvention {
        match self {
            Self::Standard => MarkerConvention::STANDARD,
            Self::Legacy => MarkerConvention::LEGACY,
        }
    }
}

impl fmt::Display for MarkerStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::Legacy => f.write_str("legacy"),
        }
    }
}

impl FromStr for MarkerStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!(
                "unknown marker style {other:?} (expected \"standard\" or \"legacy\")"
            )),
        }
    }
}

/// Concrete marker names.
///
/// `write_marker_suffix` and `dummy_name` both end with `self_suffix`, so
/// every marker's own create/delete is caught by [`is_self_event`].
///
/// [`is_self_event`]: MarkerConvention::is_self_event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerConvention {
    /// Appended to a file name to announce an upcoming self-inflicted write.
    pub write_marker_suffix: &'static str,
    /// Any entry whose name ends with this is ignored outright.
    pub self_suffix: &'static str,
    /// Throwaway entry created inside a directory to bump its listing.
    pub dummy_name: &'static str,
}

impl MarkerConvention {
    pub const STANDARD: Self = Self {
        write_marker_suffix: ".ignore-write.marker",
        self_suffix: ".ignore-write.marker",
        dummy_name: ".dummy.ignore-write.marker",
    };

    pub const LEGACY: Self = Self {
        write_marker_suffix: ".ignore_IN_CLOSE_WRITE.nfs_inotify",
        self_suffix: ".nfs_inotify",
        dummy_name: ".dummy.nfs_inotify",
    };

    /// Whether an entry with this name is one of our own markers.
    #[must_use]
    pub fn is_self_event(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| name.as_encoded_bytes().ends_with(self.self_suffix.as_bytes()))
            .unwrap_or(false)
    }

    /// Path of the write marker announcing a touch of `target`.
    #[must_use]
    pub fn write_marker_for(&self, target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(self.write_marker_suffix);
        PathBuf::from(name)
    }

    /// Path of the dummy entry used to touch `directory`.
    #[must_use]
    pub fn dummy_in(&self, directory: &Path) -> PathBuf {
        directory.join(OsStr::new(self.dummy_name))
    }
}

impl Default for MarkerConvention {
    fn default() -> Self {
        Self::STANDARD
    }
}
