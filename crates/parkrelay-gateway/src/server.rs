//! [`GatewayServer`] – HTTP + WebSocket server for browser clients.
//!
//! Listens on `0.0.0.0:3000` (configurable via [`GatewayServer::with_port`]).
//!
//! * `GET /` or `/index.html` → 200 OK with the embedded operator page.
//! * Any other plain HTTP path → 404.
//! * WebSocket upgrades (any path) → bidirectional bridge to the
//!   [`RelayContext`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parkrelay_runtime::RelayContext;
use parkrelay_types::RelayError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Default TCP port for the gateway.
pub const DEFAULT_PORT: u16 = 3000;

/// Upper bound on the request head inspected before routing.
const MAX_HEAD_BYTES: usize = 8 * 1024;
/// How long a client may take to send its request head.
const HEAD_DEADLINE: Duration = Duration::from_secs(5);
const HEAD_POLL: Duration = Duration::from_millis(5);

/// The compiled-in operator page (HTML + JS).
const RELAY_HTML: &str = include_str!("relay.html");

// ---------------------------------------------------------------------------
// GatewayServer
// ---------------------------------------------------------------------------

/// Serves the operator page and bridges WebSocket clients to the relay.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use parkrelay_gateway::GatewayServer;
/// use parkrelay_runtime::RelayContext;
///
/// async fn serve(ctx: Arc<RelayContext>) {
///     let (_stop, shutdown) = tokio::sync::watch::channel(false);
///     GatewayServer::new(ctx)
///         .run(shutdown)
///         .await
///         .expect("gateway failed");
/// }
/// ```
pub struct GatewayServer {
    ctx: Arc<RelayContext>,
    port: u16,
}

impl GatewayServer {
    /// Create a server backed by `ctx` on the [`DEFAULT_PORT`].
    pub fn new(ctx: Arc<RelayContext>) -> Self {
        Self {
            ctx,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).  Port `0` picks a free
    /// port; read it back with [`GatewayListener::local_addr`].
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the TCP listener without accepting connections yet.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the port cannot be bound.
    pub async fn bind(self) -> Result<GatewayListener, RelayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| RelayError::Bind {
            addr: addr.to_string(),
            details: e.to_string(),
        })?;
        Ok(GatewayListener {
            listener,
            ctx: self.ctx,
        })
    }

    /// Bind and serve until `shutdown` fires.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), RelayError> {
        self.bind().await?.serve(shutdown).await
    }
}

/// A bound gateway, ready to accept connections.
pub struct GatewayListener {
    listener: TcpListener,
    ctx: Arc<RelayContext>,
}

impl GatewayListener {
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.listener
            .local_addr()
            .map_err(|e| RelayError::Transport(format!("local_addr: {e}")))
    }

    /// Accept connections until `shutdown` changes or its sender is dropped.
    ///
    /// Each connection runs on its own task.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), RelayError> {
        if let Ok(addr) = self.local_addr() {
            info!("server running at http://localhost:{}", addr.port());
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("gateway shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, ctx).await {
                                warn!(peer = %peer, error = %e, "client error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<RelayContext>,
) -> Result<(), RelayError> {
    let head = peek_request_head(&stream)
        .await
        .map_err(|e| RelayError::Transport(format!("peek error from {peer}: {e}")))?;

    if is_websocket_upgrade(&head) {
        handle_ws(stream, peer, ctx).await
    } else {
        let path = request_path(&head).unwrap_or("/").to_string();
        serve_http(stream, &path).await
    }
}

/// Peek at the request until the blank line that ends its headers, the
/// buffer is full, or [`HEAD_DEADLINE`] passes.
///
/// `peek` leaves the bytes in the socket so tungstenite's handshake still
/// sees the full request.
async fn peek_request_head(stream: &TcpStream) -> std::io::Result<String> {
    let mut buf = vec![0u8; MAX_HEAD_BYTES];
    let deadline = Instant::now() + HEAD_DEADLINE;
    let mut seen = 0;
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 || n == buf.len() || head_complete(&buf[..n]) || Instant::now() >= deadline {
            return Ok(String::from_utf8_lossy(&buf[..n]).into_owned());
        }
        if n == seen {
            // peek returns at once while bytes are queued; wait for more.
            tokio::time::sleep(HEAD_POLL).await;
        }
        seen = n;
    }
}

fn head_complete(bytes: &[u8]) -> bool {
    bytes.windows(4).any(|w| w == b"\r\n\r\n")
}

fn is_websocket_upgrade(head: &str) -> bool {
    head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    })
}

/// Path of the HTTP request line, without any query string.
fn request_path(head: &str) -> Option<&str> {
    let target = head.lines().next()?.split_whitespace().nth(1)?;
    Some(target.split('?').next().unwrap_or(target))
}

// ---------------------------------------------------------------------------
// Plain HTTP
// ---------------------------------------------------------------------------

async fn serve_http(mut stream: TcpStream, path: &str) -> Result<(), RelayError> {
    // Drain what was peeked so closing the socket does not reset it.
    let mut scratch = vec![0u8; MAX_HEAD_BYTES];
    let _ = stream.read(&mut scratch).await;

    let response = http_response(path);
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| RelayError::Transport(format!("HTTP write error: {e}")))?;
    let _ = stream.shutdown().await;
    Ok(())
}

fn http_response(path: &str) -> String {
    let (status, content_type, body) = match path {
        "/" | "/index.html" => ("200 OK", "text/html; charset=utf-8", RELAY_HTML),
        _ => ("404 Not Found", "text/plain; charset=utf-8", "Not Found"),
    };
    format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

// ---------------------------------------------------------------------------
// WebSocket bridge
// ---------------------------------------------------------------------------

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<RelayContext>,
) -> Result<(), RelayError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| RelayError::Transport(format!("WS handshake from {peer}: {e}")))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (conn, mut frames) = ctx.registry().register();
    info!(peer = %peer, connection = %conn, "WebSocket client connected");

    loop {
        tokio::select! {
            // ── Downstream: broker payloads and chatbot replies → browser ──
            frame = frames.recv() => {
                let Some(text) = frame else { break };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            // ── Upstream: browser → relay ──────────────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let ctx = Arc::clone(&ctx);
                        let text = text.as_str().to_owned();
                        tokio::spawn(async move {
                            ctx.handle_client_message(conn, &text).await;
                        });
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(connection = %conn, "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(connection = %conn, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    ctx.registry().unregister(conn);
    info!(peer = %peer, connection = %conn, "WebSocket client disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
