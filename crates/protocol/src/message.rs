//! Subscription request line and protocol errors.
//!
//! A client sends exactly one line naming the watched root it wants events
//! for. There is no acknowledgement: an unknown root simply gets the
//! connection closed.

use thiserror::Error;

/// Error type for protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// IO error during communication.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Event line without a `<kind> <path>` shape.
    #[error("malformed event line: {0:?}")]
    MalformedLine(String),

    /// Event kind other than `file` or `directory`.
    #[error("unknown event kind: {0:?}")]
    UnknownKind(String),

    /// Relative path is empty.
    #[error("empty relative path")]
    EmptyPath,

    /// Relative path cannot be carried on a single UTF-8 line.
    #[error("path cannot be sent on the wire: {0:?}")]
    InvalidPath(String),

    /// Subscription request is empty or oversized.
    #[error("invalid subscription request: {0}")]
    InvalidRequest(String),
}

/// The first (and only) line a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    root: String,
}

impl SubscribeRequest {
    /// Maximum accepted request line length in bytes, newline included.
    pub const MAX_LINE_LEN: usize = 4096;

    pub fn new(root: impl Into<String>) -> Result<Self, ProtocolError> {
        let root = root.into();
        if root.trim().is_empty() {
            return Err(ProtocolError::InvalidRequest("empty root".to_string()));
        }
        if root.contains(['\n', '\r']) {
            return Err(ProtocolError::InvalidRequest(
                "root contains a line break".to_string(),
            ));
        }
        if root.len() + 1 > Self::MAX_LINE_LEN {
            return Err(ProtocolError::InvalidRequest(format!(
                "root longer than {} bytes",
                Self::MAX_LINE_LEN - 1
            )));
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Encode as a newline-terminated line.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{}\n", self.root)
    }

    /// Parse a received request line. Surrounding whitespace is ignored.
    pub fn parse_line(line: &str) -> Result<Self, ProtocolError> {
        if line.len() > Self::MAX_LINE_LEN {
            return Err(ProtocolError::InvalidRequest(format!(
                "request longer than {} bytes",
                Self::MAX_LINE_LEN
            )));
        }
        Self::new(line.trim())
    }
}
