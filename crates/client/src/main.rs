//! nfs-notify touch client
//!
//! Runs on hosts that mount a watched root over NFS. Every event received
//! from the server is turned into a local touch, which makes this host's
//! NFS client revalidate its cached attributes for that path.

mod cli;
mod connection;
mod touch;

use clap::Parser;
use cli::Cli;
use color_eyre::eyre::{Result, WrapErr, bail};
use connection::Client;
use nfsnotify_protocol::{SubscribeRequest, logging};
use std::time::Duration;
use touch::Toucher;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_file.as_deref())?;

    if !cli.local_root.is_dir() {
        bail!("local root {} is not a directory", cli.local_root.display());
    }

    let request = SubscribeRequest::new(cli.remote_root.as_str())?;
    let toucher = Toucher::new(cli.local_root.clone(), cli.marker.convention());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %cli.addr,
        remote_root = %request.root(),
        local_root = %toucher.local_root().display(),
        marker = %cli.marker,
        "Starting nfsnotify-touch"
    );

    Client::new(cli.addr.as_str(), request, toucher)
        .reconnect_delay(Duration::from_secs(cli.reconnect_delay))
        .idle_check(Duration::from_secs(cli.idle_check))
        .once(cli.once)
        .run()
        .wrap_err_with(|| format!("cannot connect to {}", cli.addr))
}
