//! WebSocket relay server implementation

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use rendezvous_core::RelayConfig;

use crate::liveness::LivenessMonitor;
use crate::reaper::RoomReaper;
use crate::registry::Outbound;
use crate::relay::Relay;

/// Largest request head inspected to tell a WebSocket upgrade from plain HTTP
const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Time allowed for a client to send its request head
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a final close frame on a stalled socket
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Relay server
pub struct RelayServer {
    relay: Arc<Relay>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            relay: Arc::new(Relay::new(config)),
        }
    }

    /// Shared relay state
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Start the relay and run until the process is killed
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Serve connections until `shutdown` resolves, then drain
    ///
    /// On shutdown the listener stops accepting, background tasks stop, and
    /// every connection runs its normal disconnect cleanup and flushes its
    /// outbound queue before the socket closes.
    pub async fn serve_with_shutdown(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), std::io::Error> {
        info!("Relay listening on {}", listener.local_addr()?);

        let (stop_tx, stop_rx) = watch::channel(false);

        let mut background = JoinSet::new();
        background.spawn(LivenessMonitor::new(self.relay.clone()).run_loop(stop_rx.clone()));
        background.spawn(RoomReaper::new(self.relay.clone()).run_loop(stop_rx.clone()));

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let relay = self.relay.clone();
                        let stop = stop_rx.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, relay, stop).await {
                                debug!("Connection error from {}: {:?}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(
            "Shutting down, draining {} connections",
            self.relay.endpoint_count()
        );
        let _ = stop_tx.send(true);
        drop(listener);

        let drain = async { while connections.join_next().await.is_some() {} };
        if timeout(self.relay.config().shutdown_drain(), drain).await.is_err() {
            warn!("Drain timed out, aborting remaining connections");
            connections.shutdown().await;
        }

        while background.join_next().await.is_some() {}

        info!("Relay stopped");
        Ok(())
    }

    /// Get room count (for monitoring)
    pub fn room_count(&self) -> usize {
        self.relay.room_count()
    }

    /// Get endpoint count (for monitoring)
    pub fn endpoint_count(&self) -> usize {
        self.relay.endpoint_count()
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<Relay>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), BoxError> {
    if !timeout(HANDSHAKE_TIMEOUT, is_websocket_upgrade(&stream)).await?? {
        return handle_http_request(&mut stream, &relay).await;
    }

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let endpoint = relay.connect(tx)?;
    debug!("New connection from {} as {}", peer_addr, endpoint);

    // The writer drains the outbound queue in FIFO order. It ends once the
    // registry drops the endpoint and everything queued has been written.
    let mut writer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let frame = match item {
                Outbound::Message(msg) => match msg.to_json() {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        warn!("Failed to encode message: {}", e);
                        continue;
                    }
                },
                Outbound::Probe => Message::Ping(Vec::new()),
            };
            if ws_sender.send(frame).await.is_err() {
                return;
            }
        }
        let _ = timeout(CLOSE_TIMEOUT, ws_sender.close()).await;
    });
    let _writer_guard = WriterGuard(writer.abort_handle());

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => relay.handle_text(&endpoint, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => relay.mark_alive(&endpoint),
                Some(Err(e)) => {
                    debug!("WebSocket error: {:?}", e);
                    break;
                }
            },

            // Liveness timeout or write failure
            _ = &mut writer => {
                relay.disconnect(&endpoint);
                debug!("Connection closed: {}", endpoint);
                return Ok(());
            }

            _ = stop.changed() => break,
        }
    }

    relay.disconnect(&endpoint);
    let _ = writer.await;

    debug!("Connection closed: {}", endpoint);
    Ok(())
}

/// Stops a connection's writer when its handler goes away, including when
/// the handler is aborted at the end of a shutdown drain
struct WriterGuard(AbortHandle);

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Peek at the request head and look for `Upgrade: websocket`
///
/// A head larger than `MAX_REQUEST_HEAD` is handed to the WebSocket
/// handshake, which rejects it if it is not an upgrade.
async fn is_websocket_upgrade(stream: &TcpStream) -> Result<bool, std::io::Error> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    let mut last_len = 0;

    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }

        let head = &buf[..n];
        if let Some(end) = head.windows(4).position(|w| w == b"\r\n\r\n") {
            return Ok(requests_upgrade(&head[..end]));
        }
        if n == buf.len() {
            return Ok(true);
        }

        if n == last_len {
            // Nothing new yet, wait for more of the head
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        last_len = n;
    }
}

fn requests_upgrade(head: &[u8]) -> bool {
    String::from_utf8_lossy(head).lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    })
}

/// Handle an HTTP request (for health checks)
async fn handle_http_request(stream: &mut TcpStream, relay: &Relay) -> Result<(), BoxError> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let (status, body) = match path {
        "/health" => (
            "200 OK",
            serde_json::json!({
                "status": "healthy",
                "rooms": relay.room_count(),
                "endpoints": relay.endpoint_count(),
            }),
        ),
        "/stats" => (
            "200 OK",
            serde_json::json!({
                "rooms": relay.room_count(),
                "endpoints": relay.endpoint_count(),
            }),
        ),
        _ => ("404 Not Found", serde_json::json!({"error": "not found"})),
    };
    let body = body.to_string();

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
