//! Push channel tests over a real socket
//!
//! Run with: cargo test --test sync_channel

mod helpers;

use codefix_lib::server::{router, AppState};
use codefix_lib::session::config::DaemonConfig;
use codefix_lib::session::lifecycle::{shutdown_channel, ShutdownSignal};
use codefix_lib::session::protocol::{ChannelNotification, CHANNEL_REJECT_CODE};
use futures_util::{SinkExt, StreamExt};
use helpers::polling::wait_until;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const KEY: &str = "test-key";
const WAIT: Duration = Duration::from_secs(3);
const POLL: Duration = Duration::from_millis(20);

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    _root: TempDir,
    _signal: ShutdownSignal,
}

impl TestServer {
    async fn start(sync_requires_key: bool) -> Self {
        let mut config = DaemonConfig::new(KEY);
        config.sync_requires_key = sync_requires_key;
        let (shutdown, signal) = shutdown_channel();
        let state = AppState::new(&config, shutdown);

        let root = TempDir::new().unwrap();
        state
            .register_project(Some("proj1"), &root.path().to_string_lossy())
            .await
            .unwrap();
        let state = Arc::new(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _root: root,
            _signal: signal,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    async fn connect(&self, path: &str) -> Client {
        let (client, _response) = connect_async(self.url(path)).await.unwrap();
        client
    }

    async fn wait_bound(&self, identifier: &str) {
        let channels = self.state.channels.clone();
        let identifier = identifier.to_string();
        wait_until("channel to be bound", WAIT, POLL, move || {
            let channels = channels.clone();
            let identifier = identifier.clone();
            async move { channels.is_bound(&identifier).await }
        })
        .await;
    }
}

/// Next frame that is not a ping or pong
async fn next_frame(client: &mut Client) -> Message {
    loop {
        let frame = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match frame {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn test_unknown_identifier_is_closed_with_4001() {
    let server = TestServer::start(false).await;
    let mut client = server.connect("/sync/ghost").await;

    match next_frame(&mut client).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), CHANNEL_REJECT_CODE);
            assert_eq!(frame.reason, "invalid identifier");
        }
        other => panic!("expected close frame, got {:?}", other),
    }
    assert!(!server.state.channels.is_bound("ghost").await);
}

#[tokio::test]
async fn test_missing_identifier_is_closed_with_4001() {
    let server = TestServer::start(false).await;
    let mut client = server.connect("/sync").await;

    match next_frame(&mut client).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), CHANNEL_REJECT_CODE),
        other => panic!("expected close frame, got {:?}", other),
    }
    assert!(server.state.channels.is_empty().await);
}

#[tokio::test]
async fn test_pushed_message_arrives_verbatim() {
    let server = TestServer::start(false).await;
    let mut client = server.connect("/sync?identifier=proj1").await;
    server.wait_bound("proj1").await;

    let notification = ChannelNotification::FileWritten {
        file_path: "src/main.rs".to_string(),
        contents: "fn main() {}\n".to_string(),
    };
    server
        .state
        .channels
        .send_to_session("proj1", &notification)
        .await
        .unwrap();

    match next_frame(&mut client).await {
        Message::Text(text) => {
            assert_eq!(text, serde_json::to_string(&notification).unwrap());
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "fileWritten");
            assert_eq!(value["filePath"], "src/main.rs");
        }
        other => panic!("expected text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_newer_connection_replaces_older() {
    let server = TestServer::start(false).await;
    let mut first = server.connect("/sync/proj1").await;
    server.wait_bound("proj1").await;

    let mut second = server.connect("/sync/proj1").await;

    // The first connection is closed once its queue is dropped
    match next_frame(&mut first).await {
        Message::Close(_) => {}
        other => panic!("expected close on replaced connection, got {:?}", other),
    }

    // The older connection's teardown must not remove the newer mapping
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.state.channels.is_bound("proj1").await);

    server
        .state
        .channels
        .send_to_session("proj1", &serde_json::json!({ "n": 2 }))
        .await
        .unwrap();
    match next_frame(&mut second).await {
        Message::Text(text) => assert_eq!(text, r#"{"n":2}"#),
        other => panic!("expected text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_close_unbinds() {
    let server = TestServer::start(false).await;
    let mut client = server.connect("/sync/proj1").await;
    server.wait_bound("proj1").await;

    client.send(Message::Text("hello".to_string())).await.unwrap();
    client.close(None).await.unwrap();

    let channels = server.state.channels.clone();
    wait_until("channel to be unbound", WAIT, POLL, move || {
        let channels = channels.clone();
        async move { !channels.is_bound("proj1").await }
    })
    .await;
}

#[tokio::test]
async fn test_disconnect_closes_socket() {
    let server = TestServer::start(false).await;
    let mut client = server.connect("/sync/proj1").await;
    server.wait_bound("proj1").await;

    assert!(server.state.channels.disconnect("proj1").await);

    match next_frame(&mut client).await {
        Message::Close(_) => {}
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sync_key_requirement() {
    let server = TestServer::start(true).await;

    match connect_async(server.url("/sync/proj1")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("connection without key should be refused"),
    }
    assert!(!server.state.channels.is_bound("proj1").await);

    let _client = server.connect(&format!("/sync/proj1?key={}", KEY)).await;
    server.wait_bound("proj1").await;
}
