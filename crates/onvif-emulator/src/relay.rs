//! Transparent TCP pass-through
//!
//! A relay owns one listener and, for every accepted client, dials the backend
//! and pumps bytes both ways until either side is done. It never looks at the
//! payload, so RTSP-over-TCP and HTTP snapshot fetches are treated alike.

use crate::types::RelayRoute;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RELAY_BUFFER_SIZE: usize = 4096;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after the `failures`-th consecutive accept error (1-based), doubling
/// up to [`ACCEPT_BACKOFF_MAX`]
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

pub struct Relay {
    listener: TcpListener,
    route: Arc<RelayRoute>,
}

impl Relay {
    /// Listen on `route.local_port` on all interfaces
    pub async fn bind(route: RelayRoute) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, route.local_port)).await?;
        info!(
            local_port = route.local_port,
            backend = %format!("{}:{}", route.backend_host, route.backend_port),
            "TCP relay started"
        );
        Ok(Self::with_listener(listener, route))
    }

    pub fn with_listener(listener: TcpListener, route: RelayRoute) -> Self {
        Self {
            listener,
            route: Arc::new(route),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; every client gets its own session task
    pub async fn run(self) {
        let mut failures = 0u32;
        loop {
            match self.listener.accept().await {
                Ok((client, peer)) => {
                    failures = 0;
                    let route = Arc::clone(&self.route);
                    tokio::spawn(async move {
                        relay_session(client, peer, &route).await;
                    });
                }
                Err(e) => {
                    // e.g. EMFILE: retrying at once would spin
                    failures = failures.saturating_add(1);
                    let backoff = accept_backoff(failures);
                    warn!(
                        local_port = self.route.local_port,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "relay accept failed"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// One client connection: dial the backend, then pump until either side ends
async fn relay_session(client: TcpStream, peer: SocketAddr, route: &RelayRoute) {
    let backend =
        match TcpStream::connect((route.backend_host.as_str(), route.backend_port)).await {
            Ok(backend) => backend,
            Err(e) => {
                // Backend reboots are routine; dropping the client closes it
                debug!(
                    peer = %peer,
                    backend = %format!("{}:{}", route.backend_host, route.backend_port),
                    error = %e,
                    "backend connection failed"
                );
                return;
            }
        };

    let _ = client.set_nodelay(true);
    let _ = backend.set_nodelay(true);

    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let done = CancellationToken::new();
    let upstream = tokio::spawn(pump(client_read, backend_write, done.clone()));
    let downstream = tokio::spawn(pump(backend_read, client_write, done.clone()));

    let (upstream, downstream) = tokio::join!(upstream, downstream);

    debug!(
        peer = %peer,
        local_port = route.local_port,
        upstream = ?upstream.map(|r| r.map_err(|e| e.kind())),
        downstream = ?downstream.map(|r| r.map_err(|e| e.kind())),
        "relay session closed"
    );
}

/// Copy `src` into `dst` until end-of-stream, an I/O error, or until the
/// opposite direction finishes.
///
/// Returns the number of bytes forwarded. On return `dst` is shut down and
/// `done` is cancelled so the sibling pump stops as well.
async fn pump<R, W>(mut src: R, mut dst: W, done: CancellationToken) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; RELAY_BUFFER_SIZE];
    let mut forwarded = 0u64;

    let result = loop {
        let read = tokio::select! {
            _ = done.cancelled() => break Ok(forwarded),
            read = src.read(&mut buffer) => read,
        };

        let size = match read {
            Ok(0) => break Ok(forwarded),
            Ok(size) => size,
            Err(e) => break Err(e),
        };

        let written = tokio::select! {
            _ = done.cancelled() => break Ok(forwarded),
            written = dst.write_all(&buffer[..size]) => written,
        };
        if let Err(e) = written {
            break Err(e);
        }
        forwarded += size as u64;
    };

    let _ = dst.shutdown().await;
    done.cancel();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn start_relay(backend_port: u16) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay = Relay::with_listener(
            listener,
            RelayRoute {
                local_port: 0,
                backend_host: "127.0.0.1".to_string(),
                backend_port,
            },
        );
        let addr = relay.local_addr().unwrap();
        tokio::spawn(relay.run());
        addr
    }

    #[tokio::test]
    async fn test_relays_backend_bytes_and_closes() {
        let script: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_port = backend.local_addr().unwrap().port();
        let expected = script.clone();
        tokio::spawn(async move {
            let (mut stream, _) = backend.accept().await.unwrap();
            stream.write_all(&script).await.unwrap();
            // Dropping the stream closes the backend side
        });

        let relay_addr = start_relay(backend_port).await;
        let mut client = TcpStream::connect(relay_addr).await.unwrap();

        let mut received = Vec::new();
        timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .expect("client was not closed after backend closed")
            .unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_relays_both_directions() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_port = backend.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = backend.accept().await.unwrap();
            let mut request = [0u8; 64];
            let size = stream.read(&mut request).await.unwrap();
            stream.write_all(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n").await.unwrap();
            stream.write_all(&request[..size]).await.unwrap();
        });

        let relay_addr = start_relay(backend_port).await;
        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"OPTIONS * RTSP/1.0").await.unwrap();

        let mut received = Vec::new();
        timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .expect("relay session did not finish")
            .unwrap();
        assert_eq!(
            received,
            b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\nOPTIONS * RTSP/1.0".to_vec()
        );
    }

    #[tokio::test]
    async fn test_client_close_ends_backend_connection() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_port = backend.local_addr().unwrap().port();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = backend.accept().await.unwrap();
            let mut received = Vec::new();
            let _ = stream.read_to_end(&mut received).await;
            let _ = tx.send(received);
        });

        let relay_addr = start_relay(backend_port).await;
        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"GET /snap.jpg HTTP/1.0\r\n\r\n").await.unwrap();
        drop(client);

        let received = timeout(Duration::from_secs(5), rx)
            .await
            .expect("backend connection was not closed")
            .unwrap();
        assert_eq!(received, b"GET /snap.jpg HTTP/1.0\r\n\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_unreachable_backend_closes_client() {
        // Grab a free port, then release it so connections are refused
        let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_port = placeholder.local_addr().unwrap().port();
        drop(placeholder);

        let relay_addr = start_relay(backend_port).await;
        let mut client = TcpStream::connect(relay_addr).await.unwrap();

        let mut received = Vec::new();
        let result = timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .expect("client connection hung after backend refused");
        // Either a clean EOF or a reset, but never data
        if result.is_ok() {
            assert!(received.is_empty());
        }

        // The listener keeps serving after a failed dial
        let second = TcpStream::connect(relay_addr).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_sessions() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_port = backend.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = backend.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut read, mut write) = stream.split();
                    let _ = tokio::io::copy(&mut read, &mut write).await;
                });
            }
        });

        let relay_addr = start_relay(backend_port).await;

        let mut sessions = Vec::new();
        for i in 0..8u8 {
            sessions.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(relay_addr).await.unwrap();
                let payload = vec![i; 1000];
                client.write_all(&payload).await.unwrap();
                let mut echoed = vec![0u8; payload.len()];
                client.read_exact(&mut echoed).await.unwrap();
                assert_eq!(echoed, payload);
            }));
        }

        for session in sessions {
            timeout(Duration::from_secs(5), session)
                .await
                .expect("session timed out")
                .unwrap();
        }
    }

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(8), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
        assert!(accept_backoff(0) > Duration::ZERO);
    }
}
