//! TCP broadcast server.
//!
//! Each connection names a watched root on its first line and then receives
//! that root's events, one line each, until either side goes away.

use crate::registry::{Subscription, SubscriptionRegistry};
use nfsnotify_protocol::{NormalizedEvent, SubscribeRequest};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, broadcast};

/// How long a new connection may take to send its request line.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server accepting subscriber connections
pub struct Server {
    listener: TcpListener,
    /// Shared subscription registry
    registry: Arc<SubscriptionRegistry>,
    /// Caps concurrent connections
    slots: Arc<Semaphore>,
    request_timeout: Duration,
    /// Shutdown signal receiver
    shutdown_rx: broadcast::Receiver<()>,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(
        addr: &str,
        registry: Arc<SubscriptionRegistry>,
        max_clients: usize,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry,
            slots: Arc::new(Semaphore::new(max_clients)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_rx,
        })
    }

    /// Close connections that have not sent a request line within `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until shutdown.
    pub async fn run(mut self) -> color_eyre::Result<()> {
        tracing::info!(addr = %self.local_addr()?, "Server listening");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => {
                            tracing::error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            tracing::warn!(peer = %peer, "Too many clients, closing connection");
            return;
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let registry = Arc::clone(&self.registry);
        let shutdown_rx = self.shutdown_rx.resubscribe();
        let request_timeout = self.request_timeout;
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            let result = handle_client(
                read_half,
                write_half,
                peer,
                &registry,
                request_timeout,
                shutdown_rx,
            )
            .await;
            if let Err(e) = result {
                tracing::debug!(peer = %peer, error = %e, "Client connection ended");
            }
            drop(permit);
        });
    }
}

/// Serve one subscriber connection.
async fn handle_client<R, W>(
    reader: R,
    mut writer: W,
    peer: SocketAddr,
    registry: &SubscriptionRegistry,
    request_timeout: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let request = tokio::time::timeout(
        request_timeout,
        read_subscription(&mut reader, peer, registry),
    );
    let subscription = match request.await {
        Ok(result) => result?,
        Err(_) => {
            tracing::debug!(peer = %peer, "No request line in time, closing connection");
            return Ok(());
        }
    };
    let Some(mut subscription) = subscription else {
        return Ok(());
    };
    tracing::info!(
        peer = %peer,
        root = %subscription.root(),
        subscriber_id = subscription.id(),
        "Client subscribed"
    );

    let mut scratch = [0u8; 512];
    loop {
        tokio::select! {
            event = subscription.recv() => {
                match event {
                    Some(event) => send_event(&mut writer, &event).await?,
                    None => {
                        tracing::debug!(peer = %peer, "Producer gone, closing connection");
                        break;
                    }
                }
            }
            read_result = reader.read(&mut scratch) => {
                match read_result {
                    // Client disconnected
                    Ok(0) | Err(_) => break,
                    // Anything after the request line is ignored.
                    Ok(_) => {}
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!(peer = %peer, "Client handler received shutdown signal");
                break;
            }
        }
    }

    tracing::info!(peer = %peer, subscriber_id = subscription.id(), "Client disconnected");
    Ok(())
}

/// Read the request line and subscribe. `None` means the connection should
/// just be closed.
async fn read_subscription<R>(
    reader: &mut BufReader<R>,
    peer: SocketAddr,
    registry: &SubscriptionRegistry,
) -> std::io::Result<Option<Subscription>>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let limit = SubscribeRequest::MAX_LINE_LEN as u64 + 1;
    (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;

    let request = match std::str::from_utf8(&line)
        .map_err(|e| e.to_string())
        .and_then(|text| SubscribeRequest::parse_line(text).map_err(|e| e.to_string()))
    {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "Invalid subscription request");
            return Ok(None);
        }
    };

    let subscription = registry.subscribe(request.root());
    if subscription.is_none() {
        tracing::debug!(peer = %peer, root = %request.root(), "Unknown root requested");
    }
    Ok(subscription)
}

async fn send_event<W>(writer: &mut W, event: &NormalizedEvent) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(event.to_line().as_bytes()).await?;
    writer.flush().await
}

/// Connect to a running server and stream one root's events to `on_event`.
///
/// Returns when the server closes the connection.
pub async fn tail<F>(addr: &str, root: &str, mut on_event: F) -> color_eyre::Result<()>
where
    F: FnMut(NormalizedEvent),
{
    let request = SubscribeRequest::new(root)?;
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(request.to_line().as_bytes()).await?;

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        match NormalizedEvent::parse_line(&line) {
            Ok(event) => on_event(event),
            Err(e) => tracing::warn!(error = %e, "Unparseable line from server"),
        }
    }
    Ok(())
}
