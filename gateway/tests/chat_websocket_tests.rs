//! Chat WebSocket integration tests
//!
//! Starts the real router on an ephemeral port with a scripted conversation
//! factory and drives it with a WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use voicechat_gateway::core::conversation::{
    BaseConversation, BoxedConversation, ConversationError, ConversationFactory,
    ConversationResult, FragmentStream, TurnContent,
};
use voicechat_gateway::{ServerConfig, create_app, state::AppState};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Scripted conversation
// =============================================================================

/// Replies "Echo: " followed by the turn text, one fragment per word.
///
/// The text `fail` produces a mid-stream failure and `slow` spaces fragments
/// 200 ms apart.
struct EchoConversation {
    started: bool,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl BaseConversation for EchoConversation {
    async fn start(&mut self) -> ConversationResult<()> {
        self.started = true;
        Ok(())
    }

    fn send_turn(&mut self, content: TurnContent) -> FragmentStream<'_> {
        Box::pin(async_stream::stream! {
            match content {
                TurnContent::Text(text) if text == "fail" => {
                    yield Ok("Partial ".to_string());
                    yield Err(ConversationError::ProviderError("scripted failure".to_string()));
                }
                TurnContent::Text(text) => {
                    let delay = (text == "slow").then(|| Duration::from_millis(200));
                    yield Ok("Echo: ".to_string());
                    for word in text.split_whitespace() {
                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        }
                        yield Ok(format!("{word} "));
                    }
                }
                TurnContent::Audio { data, mime_type } => {
                    yield Ok(format!("Heard {} bytes of {}", data.len(), mime_type));
                }
            }
        })
    }

    async fn close(&mut self) -> ConversationResult<()> {
        self.started = false;
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn get_provider_info(&self) -> Value {
        json!({"provider": "echo"})
    }
}

#[derive(Default)]
struct EchoFactory {
    closed: Arc<AtomicUsize>,
}

impl ConversationFactory for EchoFactory {
    fn create(&self) -> ConversationResult<BoxedConversation> {
        Ok(Box::new(EchoConversation {
            started: false,
            closed: self.closed.clone(),
        }))
    }

    fn provider_name(&self) -> &str {
        "echo"
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn create_test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        gemini_api_key: "test-key".to_string(),
        gemini_model: "gemini-1.5-flash".to_string(),
        gemini_base_url: "http://127.0.0.1:9/v1beta".to_string(),
        temperature: None,
        max_output_tokens: None,
        system_instructions: "You are Rev.".to_string(),
        turn_timeout_seconds: 5,
        idle_timeout_seconds: 0,
        cors_allowed_origins: None,
        // Disables the rate limiter
        rate_limit_requests_per_second: 100_000,
        rate_limit_burst_size: 10,
        max_websocket_connections: None,
        max_connections_per_ip: 100,
    }
}

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    closed: Arc<AtomicUsize>,
}

async fn spawn_server(config: ServerConfig) -> TestServer {
    let factory = EchoFactory::default();
    let closed = factory.closed.clone();
    let state = AppState::with_factory(config, Arc::new(factory));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        state,
        closed,
    }
}

async fn connect(addr: SocketAddr, client_id: &str) -> Result<WsClient, tungstenite::Error> {
    connect_async(format!("ws://{addr}/ws/{client_id}"))
        .await
        .map(|(ws, _)| ws)
}

async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed")
            .expect("websocket error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("Unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

/// Events up to and including the turn's terminal event.
async fn turn_events(ws: &mut WsClient) -> Vec<Value> {
    let mut events = Vec::new();
    loop {
        let event = next_event(ws).await;
        let terminal = matches!(event["type"].as_str(), Some("response_end" | "error"));
        events.push(event);
        if terminal {
            return events;
        }
    }
}

fn reply_text(events: &[Value]) -> String {
    events
        .iter()
        .filter(|event| event["type"] == "response_chunk")
        .filter_map(|event| event["text"].as_str())
        .collect()
}

fn http_status(err: tungstenite::Error) -> u16 {
    match err {
        tungstenite::Error::Http(response) => response.status().as_u16(),
        other => panic!("Expected HTTP rejection, got {other:?}"),
    }
}

async fn wait_for_sessions(state: &AppState, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while state.registry.count() != expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} sessions, found {}",
            state.registry.count()
        )
    });
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_health_check_reports_active_connections() {
    let server = spawn_server(create_test_config()).await;
    let url = format!("http://{}/health", server.addr);

    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body, json!({"status": "healthy", "active_connections": 0}));

    let mut ws = connect(server.addr, "health-client").await.unwrap();
    wait_for_sessions(&server.state, 1).await;
    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["active_connections"], 1);

    ws.close(None).await.unwrap();
    wait_for_sessions(&server.state, 0).await;
}

#[tokio::test]
async fn test_security_headers_present() {
    let server = spawn_server(create_test_config()).await;
    let response = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap();

    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}

#[tokio::test]
async fn test_text_turn_streams_reply() {
    let server = spawn_server(create_test_config()).await;
    let mut ws = connect(server.addr, "client-1").await.unwrap();

    send_json(&mut ws, json!({"type": "text", "text": "Tell me about RV400"})).await;
    let events = turn_events(&mut ws).await;

    assert_eq!(events.last().unwrap(), &json!({"type": "response_end"}));
    assert_eq!(reply_text(&events), "Echo: Tell me about RV400 ");
    assert!(
        events[..events.len() - 1]
            .iter()
            .all(|event| event["type"] == "response_chunk" && event["text"] != "")
    );
}

#[tokio::test]
async fn test_audio_turn_streams_reply() {
    let server = spawn_server(create_test_config()).await;
    let mut ws = connect(server.addr, "audio-client").await.unwrap();

    send_json(&mut ws, json!({"type": "audio", "audio_data": "AQIDBA=="})).await;
    let events = turn_events(&mut ws).await;

    assert_eq!(reply_text(&events), "Heard 4 bytes of audio/webm");
    assert_eq!(events.last().unwrap()["type"], "response_end");
}

#[tokio::test]
async fn test_ping_pong() {
    let server = spawn_server(create_test_config()).await;
    let mut ws = connect(server.addr, "pinger").await.unwrap();

    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_event(&mut ws).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_ping_answered_during_slow_reply() {
    let server = spawn_server(create_test_config()).await;
    let mut ws = connect(server.addr, "slow-client").await.unwrap();

    send_json(&mut ws, json!({"type": "text", "text": "slow"})).await;
    assert_eq!(next_event(&mut ws).await["text"], "Echo: ");
    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_event(&mut ws).await, json!({"type": "pong"}));

    let rest = turn_events(&mut ws).await;
    assert_eq!(reply_text(&rest), "slow ");
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let server = spawn_server(create_test_config()).await;
    let mut ws = connect(server.addr, "sloppy-client").await.unwrap();

    ws.send(Message::text("not json")).await.unwrap();
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert!(event["message"].as_str().unwrap().contains("Invalid message format"));

    send_json(&mut ws, json!({"type": "audio", "audio_data": "%%%"})).await;
    assert_eq!(next_event(&mut ws).await["type"], "error");

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    assert_eq!(next_event(&mut ws).await["type"], "error");

    send_json(&mut ws, json!({"type": "text", "text": "hello"})).await;
    let events = turn_events(&mut ws).await;
    assert_eq!(reply_text(&events), "Echo: hello ");
}

#[tokio::test]
async fn test_upstream_failure_then_recovery() {
    let server = spawn_server(create_test_config()).await;
    let mut ws = connect(server.addr, "unlucky-client").await.unwrap();

    send_json(&mut ws, json!({"type": "text", "text": "fail"})).await;
    let events = turn_events(&mut ws).await;
    assert_eq!(events[0], json!({"type": "response_chunk", "text": "Partial "}));
    assert_eq!(events[1]["type"], "error");
    assert!(events[1]["message"].as_str().unwrap().contains("scripted failure"));
    assert!(!events.iter().any(|event| event["type"] == "response_end"));

    send_json(&mut ws, json!({"type": "text", "text": "again"})).await;
    let events = turn_events(&mut ws).await;
    assert_eq!(reply_text(&events), "Echo: again ");
}

#[tokio::test]
async fn test_back_to_back_turns_are_serialized() {
    let server = spawn_server(create_test_config()).await;
    let mut ws = connect(server.addr, "eager-client").await.unwrap();

    send_json(&mut ws, json!({"type": "text", "text": "slow one two"})).await;
    send_json(&mut ws, json!({"type": "text", "text": "second"})).await;

    let first = turn_events(&mut ws).await;
    let second = turn_events(&mut ws).await;
    assert_eq!(reply_text(&first), "Echo: slow one two ");
    assert_eq!(reply_text(&second), "Echo: second ");
}

#[tokio::test]
async fn test_invalid_client_id_rejected() {
    let server = spawn_server(create_test_config()).await;

    let err = connect(server.addr, "bad!id").await.unwrap_err();
    assert_eq!(http_status(err), 400);

    let long_id = "x".repeat(129);
    let err = connect(server.addr, &long_id).await.unwrap_err();
    assert_eq!(http_status(err), 400);

    assert_eq!(server.state.registry.count(), 0);
}

#[tokio::test]
async fn test_duplicate_client_id_rejected() {
    let server = spawn_server(create_test_config()).await;

    let mut first = connect(server.addr, "same-id").await.unwrap();
    wait_for_sessions(&server.state, 1).await;

    let err = connect(server.addr, "same-id").await.unwrap_err();
    assert_eq!(http_status(err), 409);

    // The first connection is unaffected
    send_json(&mut first, json!({"type": "ping"})).await;
    assert_eq!(next_event(&mut first).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_client_id_reusable_after_disconnect() {
    let server = spawn_server(create_test_config()).await;

    let mut ws = connect(server.addr, "returning").await.unwrap();
    send_json(&mut ws, json!({"type": "text", "text": "hi"})).await;
    turn_events(&mut ws).await;
    ws.close(None).await.unwrap();
    wait_for_sessions(&server.state, 0).await;

    // Every session closes its upstream conversation
    timeout(Duration::from_secs(5), async {
        while server.closed.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let mut ws = connect(server.addr, "returning").await.unwrap();
    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_event(&mut ws).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_per_ip_connection_limit() {
    let mut config = create_test_config();
    config.max_connections_per_ip = 1;
    let server = spawn_server(config).await;

    let _first = connect(server.addr, "first").await.unwrap();
    wait_for_sessions(&server.state, 1).await;

    let err = connect(server.addr, "second").await.unwrap_err();
    assert_eq!(http_status(err), 429);
}

#[tokio::test]
async fn test_global_connection_limit_released_on_disconnect() {
    let mut config = create_test_config();
    config.max_websocket_connections = Some(1);
    let server = spawn_server(config).await;

    let mut first = connect(server.addr, "first").await.unwrap();
    wait_for_sessions(&server.state, 1).await;

    let err = connect(server.addr, "second").await.unwrap_err();
    assert_eq!(http_status(err), 503);

    first.close(None).await.unwrap();
    wait_for_sessions(&server.state, 0).await;
    timeout(Duration::from_secs(5), async {
        while server.state.ws_connection_count() != 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert!(connect(server.addr, "second").await.is_ok());
}

#[tokio::test]
async fn test_idle_connection_closed() {
    let mut config = create_test_config();
    config.idle_timeout_seconds = 1;
    let server = spawn_server(config).await;

    let mut ws = connect(server.addr, "sleepy").await.unwrap();
    let event = next_event(&mut ws).await;
    assert_eq!(
        event,
        json!({"type": "error", "message": "Connection closed due to inactivity"})
    );
    wait_for_sessions(&server.state, 0).await;
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let server = spawn_server(create_test_config()).await;

    let mut clients = Vec::new();
    for i in 0..3 {
        let mut ws = connect(server.addr, &format!("client-{i}")).await.unwrap();
        // Conversations are created on the first turn
        send_json(&mut ws, json!({"type": "text", "text": "hi"})).await;
        turn_events(&mut ws).await;
        clients.push(ws);
    }
    wait_for_sessions(&server.state, 3).await;

    server.state.shutdown.cancel();
    wait_for_sessions(&server.state, 0).await;

    for mut ws in clients {
        let closed = timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "client was not disconnected");
    }
    assert_eq!(server.closed.load(Ordering::SeqCst), 3);
}
