//! nfs-notify daemon
//!
//! Watches directory trees on an NFS server host and streams a normalized
//! event for every change to subscribed clients over TCP, so they can
//! invalidate their NFS attribute caches.

mod classifier;
mod cli;
mod config;
mod producer;
mod registry;
mod server;
mod source;
mod watch_tree;

use classifier::PathClassifier;
use clap::Parser;
use cli::{Cli, Command};
use color_eyre::eyre::{Result, WrapErr, eyre};
use config::Config;
use nfsnotify_protocol::logging;
use producer::EventProducer;
use registry::SubscriptionRegistry;
use server::Server;
use source::poll::PollSource;
use source::{Backend, WatchSource};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::broadcast;
use watch_tree::WatchTree;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Start {
            roots,
            listen,
            backend,
            marker,
            log_file,
        } => {
            let config = Config::load(cli.config.as_ref())?
                .with_roots(roots)
                .with_listen(listen)
                .with_backend(backend)
                .with_marker(marker)
                .with_log_file(log_file)
                .with_log_level(cli.log_level);
            logging::init(&config.server.log_level, config.server.log_file.as_deref())?;
            cmd_start(config).await
        }
        Command::Tail { root, addr } => {
            // For CLI commands, use minimal logging
            logging::init(cli.log_level.as_deref().unwrap_or("warn"), None)?;
            cmd_tail(&root, addr).await
        }
    }
}

async fn cmd_start(config: Config) -> Result<()> {
    config.validate()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen,
        backend = %config.watch.backend,
        marker = %config.watch.marker,
        roots = config.roots.len(),
        "Starting nfsnotifyd"
    );

    let registry = Arc::new(SubscriptionRegistry::new(config.root_names()));

    // Every root must be watchable before the server accepts anyone.
    let mut producers = Vec::with_capacity(config.roots.len());
    for root in &config.roots {
        let handle = match config.watch.backend {
            Backend::Inotify => start_inotify_producer(&root.path, &config, &registry)?,
            Backend::Poll => {
                let source = PollSource::new(config.watch.poll_interval())?;
                start_producer(source, &root.path, &config, &registry)?
            }
        };
        producers.push(handle);
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    // Set up signal handlers
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to set up signal handlers");
            }
        }
    });

    let server = Server::bind(
        &config.server.listen,
        Arc::clone(&registry),
        config.server.max_clients,
        shutdown_rx,
    )
    .await
    .wrap_err_with(|| format!("cannot listen on {}", config.server.listen))?
    .with_request_timeout(config.server.request_timeout());
    server.run().await?;

    // Producers block in the kernel and end with the process.
    tracing::info!(
        producers = producers.len(),
        subscribers = registry.stats().subscribers,
        "Daemon stopped"
    );
    Ok(())
}

#[cfg(target_os = "linux")]
fn start_inotify_producer(
    root: &Path,
    config: &Config,
    registry: &SubscriptionRegistry,
) -> Result<JoinHandle<()>> {
    let source = source::inotify::InotifySource::new()
        .wrap_err("cannot initialize inotify (try --backend poll)")?;
    start_producer(source, root, config, registry)
}

#[cfg(not(target_os = "linux"))]
fn start_inotify_producer(
    _root: &Path,
    _config: &Config,
    _registry: &SubscriptionRegistry,
) -> Result<JoinHandle<()>> {
    Err(eyre!(
        "the inotify backend is only available on Linux, use --backend poll"
    ))
}

fn start_producer<S: WatchSource + 'static>(
    source: S,
    root: &Path,
    config: &Config,
    registry: &SubscriptionRegistry,
) -> Result<JoinHandle<()>> {
    let name = root.to_string_lossy();
    let markers = config.watch.marker.convention();

    let mut tree = WatchTree::new(root, source, markers);
    let watches = tree.install_root()?;
    tracing::info!(root = %name, watches, "Watching root");

    let publisher = registry
        .publisher(&name)
        .ok_or_else(|| eyre!("root {name} missing from registry"))?;
    let classifier = PathClassifier::new(root, markers);
    let handle = EventProducer::new(tree, classifier, publisher)
        .spawn()
        .wrap_err_with(|| format!("cannot start producer for {name}"))?;
    Ok(handle)
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C");
    }

    Ok(())
}

async fn cmd_tail(root: &str, addr: Option<String>) -> Result<()> {
    let addr = addr.unwrap_or_else(nfsnotify_protocol::get_connect_addr);
    server::tail(&addr, root, |event| println!("{event}")).await?;
    println!("Connection closed by server");
    Ok(())
}

