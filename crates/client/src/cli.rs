//! Command-line interface for nfsnotify-touch.

use clap::Parser;
use nfsnotify_protocol::MarkerStyle;
use std::path::PathBuf;

/// nfs-notify touch client - subscribes to a watched root and touches the
/// matching paths under a local NFS mount
#[derive(Debug, Parser)]
#[command(name = "nfsnotify-touch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Server address (host:port)
    #[arg(env = "NFSNOTIFY_ADDR")]
    pub addr: String,

    /// Watched root on the server, exactly as configured there
    pub remote_root: String,

    /// Where that root is mounted on this host
    pub local_root: PathBuf,

    /// Marker file convention (standard, legacy)
    #[arg(short, long, default_value_t = MarkerStyle::Standard)]
    pub marker: MarkerStyle,

    /// Seconds to wait before reconnecting
    #[arg(short, long, default_value_t = 5)]
    pub reconnect_delay: u64,

    /// Seconds without events before the connection is checked
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub idle_check: u64,

    /// Exit when the connection ends instead of reconnecting
    #[arg(long)]
    pub once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "NFSNOTIFY_TOUCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
