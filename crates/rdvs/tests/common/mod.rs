#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rdvs::config::ServerConfig;
use rdvs::server::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        max_conns: 1000,
        max_conns_ip: 100,
        ..ServerConfig::default()
    }
}

pub fn join_text(code: &str, is_initiator: bool) -> String {
    serde_json::json!({ "type": "join", "sessionCode": code, "isInitiator": is_initiator })
        .to_string()
}

pub const READY: &str = r#"{"type":"ready"}"#;

pub struct TestClient {
    pub ws_tx: SplitSink<Ws, Message>,
    pub ws_rx: SplitStream<Ws>,
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws_tx
            .send(Message::Text(text.to_owned()))
            .await
            .unwrap();
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) {
        self.ws_tx.send(Message::Binary(data)).await.unwrap();
    }

    pub async fn join(&mut self, code: &str, is_initiator: bool) {
        self.send_text(&join_text(code, is_initiator)).await;
    }

    /// Next text message, skipping control frames. Panics after 5s.
    pub async fn recv_text(&mut self) -> String {
        self.recv_text_timeout(Duration::from_secs(5))
            .await
            .expect("timeout waiting for text message")
    }

    /// Next text message, or `None` on timeout or close.
    pub async fn recv_text_timeout(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, async {
            while let Some(msg) = self.ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => return Some(text),
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Ok(Message::Close(_)) | Err(_) => return None,
                    Ok(other) => panic!("unexpected message {other:?}"),
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// `true` if the next frame from the server is a ping.
    pub async fn recv_ping(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.ws_rx.next()).await,
            Ok(Some(Ok(Message::Ping(_))))
        )
    }

    /// `true` once the server has closed the socket; `false` on timeout or
    /// if a data message arrives first.
    pub async fn wait_closed(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                match self.ws_rx.next().await {
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_)) | Err(_)) | None => return true,
                    Some(Ok(_)) => return false,
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    pub async fn expect_ready(&mut self) {
        assert_eq!(self.recv_text().await, READY);
    }

    pub async fn expect_silence(&mut self) {
        if let Some(text) = self.recv_text_timeout(Duration::from_millis(300)).await {
            panic!("expected no message, got {text}");
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws_tx.send(Message::Close(None)).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(Ok(_)) = self.ws_rx.next().await {}
        })
        .await;
    }
}

pub async fn start_server_with(
    config: impl FnOnce(SocketAddr) -> ServerConfig,
) -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::new(config(addr)));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = rdvs::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    start_server_with(test_config).await
}

/// Plain HTTP/1.1 GET; returns status code and body.
pub async fn http_get(addr: &SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("timeout waiting for http response")
        .unwrap();
    let raw = String::from_utf8(raw).unwrap();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let status = head.split_whitespace().nth(1).unwrap().parse().unwrap();
    (status, body.to_string())
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
