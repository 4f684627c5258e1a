//! nfs-notify protocol - shared types for the broadcast server and the
//! touch client.
//!
//! This crate provides:
//! - [`NormalizedEvent`] and [`EventKind`], the only unit sent over the wire
//! - [`SubscribeRequest`], the single line a client sends after connecting
//! - [`MarkerConvention`], the marker file names both sides agree on
//! - Address helpers via [`get_listen_addr`] and [`get_connect_addr`]
//! - With the `logging` feature, the binaries' shared `logging::init`
//!
//! # Wire Format
//!
//! Plain text, one newline-terminated line per message:
//!
//! ```text
//! client -> server:  /data
//! server -> client:  directory a
//! server -> client:  file a/b.txt
//! ```
//!
//! # Example
//!
//! ```rust
//! use nfsnotify_protocol::{EventKind, NormalizedEvent};
//!
//! let event = NormalizedEvent::file("a/b.txt").unwrap();
//! let line = event.to_line();
//! assert_eq!(line, "file a/b.txt\n");
//!
//! let decoded = NormalizedEvent::parse_line(&line).unwrap();
//! assert_eq!(decoded.kind(), EventKind::File);
//! ```

mod addr;
mod event;
#[cfg(feature = "logging")]
pub mod logging;
mod marker;
mod message;

pub use addr::{
    ADDR_ENV_VAR, DEFAULT_CONNECT_ADDR, DEFAULT_LISTEN_ADDR, DEFAULT_PORT, get_connect_addr,
    get_listen_addr,
};
pub use event::{EventKind, NormalizedEvent, ROOT_RELATIVE_PATH};
pub use marker::{MarkerConvention, MarkerStyle};
pub use message::{ProtocolError, SubscribeRequest};
