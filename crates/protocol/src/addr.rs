//! Server address helpers.

/// Default TCP port of the broadcast server.
pub const DEFAULT_PORT: u16 = 7345;

/// Default listen address of the broadcast server.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7345";

/// Default address clients connect to.
pub const DEFAULT_CONNECT_ADDR: &str = "127.0.0.1:7345";

/// Environment variable to override the default address.
pub const ADDR_ENV_VAR: &str = "NFSNOTIFY_ADDR";

/// Address the server listens on.
///
/// Checks the `NFSNOTIFY_ADDR` environment variable first, falling back to
/// `0.0.0.0:7345`.
#[must_use]
pub fn get_listen_addr() -> String {
    std::env::var(ADDR_ENV_VAR).unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
}

/// Address a client connects to.
///
/// Checks the `NFSNOTIFY_ADDR` environment variable first, falling back to
/// `127.0.0.1:7345`.
#[must_use]
pub fn get_connect_addr() -> String {
    std::env::var(ADDR_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONNECT_ADDR.to_string())
}
