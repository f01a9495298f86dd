//! End-to-end relay tests
//!
//! Runs the full server with the Gemini conversation provider pointed at a
//! mocked Generative Language API.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voicechat_gateway::{ServerConfig, create_app, state::AppState};

const MODEL_PATH: &str = "/v1beta/models/gemini-1.5-flash";
const INSTRUCTIONS: &str = "You are Rev, the Revolt Motors assistant.";

fn create_test_config(gemini: &MockServer) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        gemini_api_key: "relay-test-key".to_string(),
        gemini_model: "gemini-1.5-flash".to_string(),
        gemini_base_url: format!("{}/v1beta", gemini.uri()),
        temperature: Some(0.5),
        max_output_tokens: None,
        system_instructions: INSTRUCTIONS.to_string(),
        turn_timeout_seconds: 5,
        idle_timeout_seconds: 0,
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 100_000,
        rate_limit_burst_size: 10,
        max_websocket_connections: None,
        max_connections_per_ip: 100,
    }
}

async fn spawn_server(config: ServerConfig) -> SocketAddr {
    let state = AppState::new(config).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

fn sse_body(chunks: &[&str]) -> String {
    chunks
        .iter()
        .map(|text| {
            let event = json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
            });
            format!("data: {event}\r\n\r\n")
        })
        .collect()
}

async fn mount_start(gemini: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("{MODEL_PATH}:generateContent")))
        .and(header("x-goog-api-key", "relay-test-key"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": INSTRUCTIONS}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Understood."}]}}]
        })))
        .expect(1)
        .mount(gemini)
        .await;
}

async fn turn_events(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Vec<Value> {
    let mut events = Vec::new();
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed")
            .expect("websocket error");
        let Message::Text(text) = message else {
            continue;
        };
        let event: Value = serde_json::from_str(text.as_str()).unwrap();
        let terminal = matches!(event["type"].as_str(), Some("response_end" | "error"));
        events.push(event);
        if terminal {
            return events;
        }
    }
}

#[tokio::test]
async fn test_text_turn_relayed_through_gemini() {
    let gemini = MockServer::start().await;
    mount_start(&gemini).await;
    Mock::given(method("POST"))
        .and(path(format!("{MODEL_PATH}:streamGenerateContent")))
        .and(query_param("alt", "sse"))
        .and(body_partial_json(json!({"generationConfig": {"temperature": 0.5}})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["The RV400 ", "has a range of ", "150 km."])),
        )
        .mount(&gemini)
        .await;

    let addr = spawn_server(create_test_config(&gemini)).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/rider-1")).await.unwrap();

    ws.send(Message::text(
        json!({"type": "text", "text": "What is the range of the RV400?"}).to_string(),
    ))
    .await
    .unwrap();

    let events = turn_events(&mut ws).await;
    assert_eq!(
        events,
        vec![
            json!({"type": "response_chunk", "text": "The RV400 "}),
            json!({"type": "response_chunk", "text": "has a range of "}),
            json!({"type": "response_chunk", "text": "150 km."}),
            json!({"type": "response_end"}),
        ]
    );
}

#[tokio::test]
async fn test_upstream_rejection_reported_as_error_event() {
    let gemini = MockServer::start().await;
    mount_start(&gemini).await;
    Mock::given(method("POST"))
        .and(path(format!("{MODEL_PATH}:streamGenerateContent")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"code": 500, "message": "Backend overloaded", "status": "INTERNAL"}
        })))
        .mount(&gemini)
        .await;

    let addr = spawn_server(create_test_config(&gemini)).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/rider-2")).await.unwrap();

    ws.send(Message::text(json!({"type": "text", "text": "hi"}).to_string()))
        .await
        .unwrap();

    let events = turn_events(&mut ws).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert!(
        events[0]["message"]
            .as_str()
            .unwrap()
            .contains("Backend overloaded")
    );
}

#[tokio::test]
async fn test_failed_start_retried_on_next_turn() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{MODEL_PATH}:generateContent")))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&gemini)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{MODEL_PATH}:generateContent")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Understood."}]}}]
        })))
        .mount(&gemini)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{MODEL_PATH}:streamGenerateContent")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["Hello, rider!"])),
        )
        .mount(&gemini)
        .await;

    let addr = spawn_server(create_test_config(&gemini)).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/rider-3")).await.unwrap();
    let turn = json!({"type": "text", "text": "hi"}).to_string();

    ws.send(Message::text(turn.clone())).await.unwrap();
    let events = turn_events(&mut ws).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");

    ws.send(Message::text(turn)).await.unwrap();
    let events = turn_events(&mut ws).await;
    assert_eq!(
        events,
        vec![
            json!({"type": "response_chunk", "text": "Hello, rider!"}),
            json!({"type": "response_end"}),
        ]
    );
}

#[tokio::test]
async fn test_missing_api_key_rejected_at_startup() {
    let gemini = MockServer::start().await;
    let mut config = create_test_config(&gemini);
    config.gemini_api_key = String::new();

    assert!(AppState::new(config).is_err());
}
