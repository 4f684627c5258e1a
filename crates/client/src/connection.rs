//! Subscription stream handling.
//!
//! The server never replays events, so after a disconnect the client simply
//! reconnects and carries on from whatever happens next.
//!
//! The server is silent while nothing changes. When no line arrives for the
//! idle interval the client writes an empty line, which the server ignores;
//! a peer that is gone then surfaces as a write or read error.

use crate::touch::Toucher;
use nfsnotify_protocol::{NormalizedEvent, SubscribeRequest};
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Counters for one connection
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct Client {
    addr: String,
    request: SubscribeRequest,
    toucher: Toucher,
    reconnect_delay: Duration,
    idle_check: Duration,
    once: bool,
}

impl Client {
    pub fn new(addr: impl Into<String>, request: SubscribeRequest, toucher: Toucher) -> Self {
        Self {
            addr: addr.into(),
            request,
            toucher,
            reconnect_delay: Duration::from_secs(5),
            idle_check: Duration::from_secs(60),
            once: false,
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// How long the stream may stay silent before the connection is checked.
    pub fn idle_check(mut self, interval: Duration) -> Self {
        self.idle_check = interval;
        self
    }

    /// Return after the first connection ends instead of reconnecting.
    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    /// Connect and apply events until the connection ends; then reconnect
    /// unless configured to run once.
    pub fn run(&self) -> io::Result<()> {
        loop {
            match self.connect() {
                Ok((reader, mut writer)) => {
                    tracing::info!(
                        addr = %self.addr,
                        root = %self.request.root(),
                        "Connected"
                    );
                    let check = || {
                        tracing::trace!(idle = ?self.idle_check, "Stream idle, checking connection");
                        writer.write_all(b"\n")
                    };
                    match self.serve(reader, check) {
                        Ok(stats) => tracing::info!(
                            applied = stats.applied,
                            failed = stats.failed,
                            skipped = stats.skipped,
                            "Connection closed by server"
                        ),
                        Err(e) => tracing::warn!(error = %e, "Connection lost"),
                    }
                }
                Err(e) if self.once => return Err(e),
                Err(e) => {
                    tracing::warn!(addr = %self.addr, error = %e, "Failed to connect");
                }
            }

            if self.once {
                return Ok(());
            }
            tracing::debug!(delay = ?self.reconnect_delay, "Reconnecting");
            std::thread::sleep(self.reconnect_delay);
        }
    }

    /// Open the stream and send the request line. Returns the read side and
    /// a second handle for connection checks.
    fn connect(&self) -> io::Result<(BufReader<TcpStream>, TcpStream)> {
        let mut stream = TcpStream::connect(&self.addr)?;
        stream.set_read_timeout(Some(self.idle_check))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        stream.write_all(self.request.to_line().as_bytes())?;
        stream.flush()?;
        let writer = stream.try_clone()?;
        Ok((BufReader::new(stream), writer))
    }

    /// Apply every event line from `reader` until EOF.
    ///
    /// A read timeout calls `on_idle`; its error ends the stream. Unparseable
    /// lines and failed touches are logged and skipped.
    pub fn serve<R, F>(&self, mut reader: R, mut on_idle: F) -> io::Result<StreamStats>
    where
        R: BufRead,
        F: FnMut() -> io::Result<()>,
    {
        let mut stats = StreamStats::default();
        let mut line = Vec::new();
        loop {
            // A timeout leaves any partial line in `line` for the next read.
            match reader.read_until(b'\n', &mut line) {
                Ok(0) if line.is_empty() => return Ok(stats),
                Ok(_) => {}
                Err(e) if is_idle(&e) => {
                    on_idle()?;
                    continue;
                }
                Err(e) => return Err(e),
            }
            self.apply_line(&line, &mut stats);
            line.clear();
        }
    }

    fn apply_line(&self, line: &[u8], stats: &mut StreamStats) {
        let event = match std::str::from_utf8(line)
            .map_err(|e| e.to_string())
            .and_then(|text| NormalizedEvent::parse_line(text).map_err(|e| e.to_string()))
        {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    line = %String::from_utf8_lossy(line).trim_end(),
                    error = %e,
                    "Skipping malformed event"
                );
                stats.skipped += 1;
                return;
            }
        };

        tracing::debug!(kind = %event.kind(), path = %event.relative_path(), "Received event");
        match self.toucher.apply(&event) {
            Ok(path) => {
                tracing::info!(kind = %event.kind(), path = %path.display(), "Touched");
                stats.applied += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Touch failed");
                stats.failed += 1;
            }
        }
    }
}

/// Read timeouts show up as `WouldBlock` on Unix and `TimedOut` on Windows.
fn is_idle(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfsnotify_protocol::MarkerConvention;
    use std::fs;
    use std::io::{Cursor, Read};
    use std::net::TcpListener;
    use std::path::Path;

    fn client(addr: &str, local_root: &Path) -> Client {
        Client::new(
            addr,
            SubscribeRequest::new("/srv/data").unwrap(),
            Toucher::new(local_root, MarkerConvention::STANDARD),
        )
    }

    #[test]
    fn test_serve_applies_events_and_skips_bad_lines() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        fs::write(root.path().join("a/b.txt"), b"").unwrap();

        let input = "directory .\n\
                     directory a\n\
                     file a/b.txt\n\
                     symlink a/c\n\
                     garbage\n\
                     file missing.txt\n\
                     directory ../escape\n";
        let stats = client("unused", root.path())
            .serve(Cursor::new(input), || Ok(()))
            .unwrap();

        assert_eq!(
            stats,
            StreamStats {
                applied: 3,
                failed: 2,
                skipped: 2,
            }
        );
        assert!(!root.path().join("missing.txt").exists());
    }

    #[test]
    fn test_serve_handles_missing_trailing_newline() {
        let root = tempfile::tempdir().unwrap();
        let stats = client("unused", root.path())
            .serve(Cursor::new("directory ."), || Ok(()))
            .unwrap();
        assert_eq!(stats.applied, 1);
    }

    #[test]
    fn test_run_once_against_server() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("b.txt"), b"").unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            reader.read_line(&mut request).unwrap();
            let mut stream = reader.into_inner();
            stream.write_all(b"file b.txt\ndirectory .\n").unwrap();
            request
        });

        client(&addr, root.path()).once(true).run().unwrap();

        assert_eq!(server.join().unwrap(), "/srv/data\n");
        assert!(!root.path().join("b.txt.ignore-write.marker").exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_run_once_fails_when_unreachable() {
        let root = tempfile::tempdir().unwrap();
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();
        assert!(client(&addr, root.path()).once(true).run().is_err());
    }

    /// Hands out its chunks one per read, with a read timeout between them.
    struct Stalling {
        chunks: Vec<&'static [u8]>,
        stalled: bool,
    }

    impl Read for Stalling {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            if !self.stalled {
                self.stalled = true;
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            self.stalled = false;
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_serve_keeps_partial_line_across_idle_timeouts() {
        let root = tempfile::tempdir().unwrap();
        let reader = BufReader::new(Stalling {
            chunks: vec![b"direc", b"tory .\n", b"directory .\n"],
            stalled: false,
        });

        let mut checks = 0;
        let stats = client("unused", root.path())
            .serve(reader, || {
                checks += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(stats.applied, 2);
        assert_eq!(stats.skipped, 0);
        assert_eq!(checks, 3);
    }

    #[test]
    fn test_failed_connection_check_ends_the_stream() {
        let root = tempfile::tempdir().unwrap();
        let reader = BufReader::new(Stalling {
            chunks: vec![b"directory .\n"],
            stalled: false,
        });
        let result = client("unused", root.path())
            .serve(reader, || Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_silent_server_is_checked_while_idle() {
        let root = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            reader.read_line(&mut request).unwrap();
            // Stay silent until the client checks in.
            let mut check = String::new();
            reader.read_line(&mut check).unwrap();
            let mut stream = reader.into_inner();
            stream.write_all(b"directory .\n").unwrap();
            check
        });

        client(&addr, root.path())
            .idle_check(Duration::from_millis(100))
            .once(true)
            .run()
            .unwrap();

        assert_eq!(server.join().unwrap(), "\n");
    }
}
