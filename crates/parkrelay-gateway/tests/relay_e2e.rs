use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parkrelay_gateway::GatewayServer;
use parkrelay_middleware::broker::forward;
use parkrelay_middleware::{BrokerPublisher, ConnectionRegistry};
use parkrelay_runtime::{IntentClient, IntentError, RelayContext};
use parkrelay_types::{BrokerMessage, RelayError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const WAIT: Duration = Duration::from_secs(3);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl BrokerPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), RelayError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Answers "open gate 2" and fails everything else.
struct GateIntent;

#[async_trait]
impl IntentClient for GateIntent {
    async fn detect_intent(
        &self,
        _session_id: &str,
        text: &str,
    ) -> Result<Option<String>, IntentError> {
        if text == "open gate 2" {
            Ok(Some("Gate 2 opening".to_string()))
        } else {
            Err(IntentError::BadResponse("service unavailable".to_string()))
        }
    }
}

struct Harness {
    addr: SocketAddr,
    ctx: Arc<RelayContext>,
    publisher: Arc<RecordingPublisher>,
    _stop: watch::Sender<bool>,
}

async fn start() -> Harness {
    let publisher = Arc::new(RecordingPublisher::default());
    let ctx = Arc::new(RelayContext::new(
        Arc::new(ConnectionRegistry::new()),
        publisher.clone(),
        Arc::new(GateIntent),
    ));
    let listener = GatewayServer::new(Arc::clone(&ctx))
        .with_port(0)
        .bind()
        .await
        .expect("bind gateway");
    let port = listener.local_addr().expect("local addr").port();
    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(listener.serve(shutdown));

    Harness {
        addr: SocketAddr::from(([127, 0, 0, 1], port)),
        ctx,
        publisher,
        _stop: stop,
    }
}

async fn connect(h: &Harness) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/", h.addr))
        .await
        .expect("websocket connect");
    ws
}

async fn wait_for_connections(h: &Harness, n: usize) {
    timeout(WAIT, async {
        while h.ctx.registry().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clients never registered");
}

async fn next_text(ws: &mut Client) -> String {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

#[tokio::test]
async fn broker_payload_reaches_every_connected_client() {
    let h = start().await;
    let mut alice = connect(&h).await;
    let mut bob = connect(&h).await;
    wait_for_connections(&h, 2).await;

    let delivered = forward(
        h.ctx.registry(),
        &BrokerMessage::new("parking/slots", "slot:A1:free"),
    );
    assert_eq!(delivered, 2);

    assert_eq!(next_text(&mut alice).await, "slot:A1:free");
    assert_eq!(next_text(&mut bob).await, "slot:A1:free");
}

#[tokio::test]
async fn client_message_gets_chatbot_reply_and_is_published() {
    let h = start().await;
    let mut client = connect(&h).await;
    wait_for_connections(&h, 1).await;

    client
        .send(Message::Text("open gate 2".into()))
        .await
        .unwrap();

    assert_eq!(next_text(&mut client).await, "Chatbot Response: Gate 2 opening");
    assert_eq!(
        *h.publisher.published.lock().unwrap(),
        vec![("chatbot/messages".to_string(), "open gate 2".to_string())]
    );
}

#[tokio::test]
async fn intent_failure_sends_fallback_and_still_publishes() {
    let h = start().await;
    let mut client = connect(&h).await;
    wait_for_connections(&h, 1).await;

    client.send(Message::Text("where can I park?".into())).await.unwrap();

    assert_eq!(
        next_text(&mut client).await,
        "Chatbot Response: An error occurred while contacting Dialogflow."
    );
    assert_eq!(h.publisher.published.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn disconnect_removes_client_from_registry() {
    let h = start().await;
    let mut client = connect(&h).await;
    wait_for_connections(&h, 1).await;

    client.close(None).await.unwrap();

    timeout(WAIT, async {
        while !h.ctx.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection was never unregistered");
}

#[tokio::test]
async fn plain_http_serves_page_and_404() {
    let h = start().await;

    let page = http_get(h.addr, "/").await;
    assert!(page.starts_with("HTTP/1.1 200 OK"));
    assert!(page.contains("WebSocket"));

    let missing = http_get(h.addr, "/nope").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found"));
}

#[tokio::test]
async fn upgrade_behind_long_headers_is_still_a_websocket() {
    let h = start().await;
    let mut stream = TcpStream::connect(h.addr).await.unwrap();
    let cookie = "c".repeat(2048);
    stream
        .write_all(
            format!(
                "GET / HTTP/1.1\r\nHost: localhost\r\nCookie: session={cookie}\r\n\
                 Upgrade: websocket\r\nConnection: Upgrade\r\n\
                 Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                 Sec-WebSocket-Version: 13\r\n\r\n"
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let mut buf = vec![0u8; 256];
    let n = timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("timed out waiting for handshake")
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 101"), "got: {response}");
    wait_for_connections(&h, 1).await;
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut body = String::new();
    timeout(WAIT, stream.read_to_string(&mut body))
        .await
        .expect("timed out reading HTTP response")
        .unwrap();
    body
}
