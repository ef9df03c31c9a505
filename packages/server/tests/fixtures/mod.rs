//! Test fixtures shared by the integration tests.

#![allow(dead_code)]

use std::{
    net::TcpStream,
    thread,
    time::{Duration, Instant},
};

use partyline_server::ServerConfig;
use tokio::sync::oneshot;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A relay server running on its own runtime for the duration of a test.
///
/// Shuts down when dropped.
pub struct TestServer {
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a server on `127.0.0.1:port` accepting the room `party`.
    pub fn start(port: u16) -> Self {
        let config = ServerConfig {
            port,
            rooms: vec!["party".to_string()],
            store_retry_backoff_ms: 1,
            ..ServerConfig::default()
        };
        let (tx, rx) = oneshot::channel::<()>();

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("Failed to build runtime");
            runtime.block_on(async move {
                let shutdown = async move {
                    let _ = rx.await;
                };
                if let Err(e) = partyline_server::run_until(config, shutdown).await {
                    panic!("test server failed: {e}");
                }
            });
        });

        let started = Instant::now();
        while TcpStream::connect(("127.0.0.1", port)).is_err() {
            assert!(
                started.elapsed() < STARTUP_TIMEOUT,
                "server did not start on port {port}"
            );
            thread::sleep(Duration::from_millis(20));
        }

        Self {
            port,
            shutdown: Some(tx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self, query: &str) -> String {
        if query.is_empty() {
            format!("ws://127.0.0.1:{}/ws", self.port)
        } else {
            format!("ws://127.0.0.1:{}/ws?{}", self.port, query)
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Open a WebSocket connection.
pub async fn connect_ws(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("Failed to connect WebSocket");
    stream
}

/// Send one event frame.
pub async fn send_event(ws: &mut WsStream, event: serde_json::Value) {
    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    ws.send(Message::Text(event.to_string().into()))
        .await
        .expect("Failed to send event");
}

/// Receive the next event frame, or `None` once the server closed the connection.
pub async fn next_event(ws: &mut WsStream) -> Option<serde_json::Value> {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for an event")?;
        match message {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(text.as_str()).expect("Invalid event JSON"));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Receive events until one of the given type arrives.
pub async fn expect_event(ws: &mut WsStream, event_type: &str) -> serde_json::Value {
    loop {
        let event = next_event(ws)
            .await
            .unwrap_or_else(|| panic!("connection closed before '{event_type}'"));
        if event["type"] == event_type {
            return event;
        }
    }
}

/// Assert that no event arrives within a short window.
pub async fn expect_silence(ws: &mut WsStream) {
    use futures_util::StreamExt;

    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "unexpected frame: {:?}", result);
}
