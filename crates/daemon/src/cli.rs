//! Command-line interface for nfsnotifyd.

use crate::source::Backend;
use clap::{Parser, Subcommand};
use nfsnotify_protocol::MarkerStyle;
use std::path::PathBuf;

/// nfs-notify daemon - propagates filesystem changes on an NFS server to
/// subscribed clients
#[derive(Debug, Parser)]
#[command(name = "nfsnotifyd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "NFSNOTIFYD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "NFSNOTIFYD_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server
    Start {
        /// Roots to watch, in addition to those in the config file
        roots: Vec<PathBuf>,

        /// Override listen address
        #[arg(long, env = "NFSNOTIFY_ADDR")]
        listen: Option<String>,

        /// Watch backend (inotify, poll)
        #[arg(short, long)]
        backend: Option<Backend>,

        /// Marker file convention (standard, legacy)
        #[arg(short, long)]
        marker: Option<MarkerStyle>,

        /// Log to this file instead of stderr
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Print the event stream of one root from a running server
    Tail {
        /// Root to subscribe to
        root: String,

        /// Server address
        #[arg(short, long, env = "NFSNOTIFY_ADDR")]
        addr: Option<String>,
    },
}
