//! End-to-end tests against an in-process gateway.
//!
//! The server speaks the real protocol over HTTP and WebSocket: it creates
//! sessions, streams three partial versions of a reply followed by a final
//! batch, and records the close frames it receives.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use parley_auth::StaticTokenProvider;
use parley_cli::{
    ChannelEvent, ChannelState, ClientConfig, Conversation, EventOutcome, GatewayClient,
    NoticeLevel, Services, WsConnector,
};
use parley_core::Role;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const SESSION_ID: &str = "s-int";
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Test Server
// =============================================================================

#[derive(Clone, Default)]
struct ServerState {
    auth_headers: Arc<Mutex<Vec<String>>>,
    close_codes: Arc<Mutex<Vec<Option<u16>>>>,
    created_for: Arc<Mutex<Vec<String>>>,
}

async fn create_session(State(state): State<ServerState>, Json(body): Json<Value>) -> Json<Value> {
    let agent = body["agent_name"].as_str().unwrap_or_default().to_string();
    state.created_for.lock().push(agent);
    Json(json!({"session_id": SESSION_ID}))
}

async fn stream_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<ServerState>,
) -> Response {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.auth_headers.lock().push(auth.to_string());
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn message(rank: i64, role: &str, text: &str) -> Value {
    json!({
        "session_id": SESSION_ID,
        "exchange_id": "e1",
        "rank": rank,
        "role": role,
        "channel": "final",
        "timestamp": "2024-05-01T10:00:00Z",
        "parts": [{"type": "text", "text": text}]
    })
}

async fn handle_socket(mut socket: WebSocket, state: ServerState) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let request: Value = serde_json::from_str(&text).unwrap_or_default();
                let prompt = request["message"].as_str().unwrap_or_default().to_string();

                if prompt == "garbage please" {
                    let _ = socket.send(Message::Text("this is not json".into())).await;
                    continue;
                }

                for partial in ["Hel", "Hello", "Hello world"] {
                    let frame = json!({"type": "stream", "message": message(0, "assistant", partial)});
                    if socket.send(Message::Text(frame.to_string())).await.is_err() {
                        return;
                    }
                }
                let final_frame = json!({
                    "type": "final",
                    "messages": [message(-1, "user", &prompt), message(0, "assistant", "Hello world")],
                    "session": {"id": SESSION_ID}
                });
                let _ = socket.send(Message::Text(final_frame.to_string())).await;
            }
            Message::Close(frame) => {
                state.close_codes.lock().push(frame.map(|f| f.code));
                return;
            }
            _ => {}
        }
    }
}

async fn spawn_gateway() -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let state = ServerState::default();
    let app = Router::new()
        .route("/v1/sessions", post(create_session))
        .route("/v1/stream", get(stream_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

// =============================================================================
// Helpers
// =============================================================================

fn conversation_for(base_url: &str) -> (Conversation, mpsc::Receiver<ChannelEvent>) {
    let config = ClientConfig {
        gateway_url: base_url.to_string(),
        agent_name: "helper".to_string(),
        ..ClientConfig::default()
    };
    let tokens = Arc::new(StaticTokenProvider::new("integration-token"));
    let gateway = Arc::new(GatewayClient::new(&config, tokens.clone()).unwrap());
    let services = Services {
        tokens,
        sessions: gateway.clone(),
        history: gateway.clone(),
        uploads: gateway,
    };
    Conversation::new(config, services, Arc::new(WsConnector))
}

async fn pump_until<F>(
    conversation: &mut Conversation,
    events: &mut mpsc::Receiver<ChannelEvent>,
    mut done: F,
) where
    F: FnMut(&Conversation, EventOutcome) -> bool,
{
    timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            let outcome = conversation.handle_channel_event(event).await;
            if done(conversation, outcome) {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for channel events");
}

async fn wait_for_close_code(state: &ServerState) -> Option<u16> {
    timeout(EVENT_TIMEOUT, async {
        loop {
            if let Some(code) = state.close_codes.lock().first().copied() {
                return code;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never saw a close frame")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn draft_message_round_trip() {
    let (base_url, state) = spawn_gateway().await;
    let (mut conversation, mut events) = conversation_for(&base_url);

    conversation.submit("hello").await;
    assert_eq!(conversation.session_id().unwrap().as_str(), SESSION_ID);

    pump_until(&mut conversation, &mut events, |_, outcome| {
        outcome == EventOutcome::Finalized
    })
    .await;

    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text(), "hello");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text(), "Hello world");

    assert_eq!(state.created_for.lock().as_slice(), ["helper"]);
    assert_eq!(
        state.auth_headers.lock().as_slice(),
        ["Bearer integration-token"]
    );
}

#[tokio::test]
async fn second_message_reuses_session_and_channel() {
    let (base_url, state) = spawn_gateway().await;
    let (mut conversation, mut events) = conversation_for(&base_url);

    conversation.submit("one").await;
    pump_until(&mut conversation, &mut events, |_, outcome| {
        outcome == EventOutcome::Finalized
    })
    .await;

    conversation.submit("two").await;
    pump_until(&mut conversation, &mut events, |_, outcome| {
        outcome == EventOutcome::Finalized
    })
    .await;

    assert_eq!(state.created_for.lock().len(), 1);
    assert_eq!(state.auth_headers.lock().len(), 1);
    assert_eq!(conversation.channel_state(), ChannelState::Open);
}

#[tokio::test]
async fn stop_sends_client_close_code() {
    let (base_url, state) = spawn_gateway().await;
    let (mut conversation, mut events) = conversation_for(&base_url);

    conversation.submit("hello").await;
    pump_until(&mut conversation, &mut events, |c, _| {
        c.channel_state() == ChannelState::Open
    })
    .await;

    conversation.stop();
    assert_eq!(conversation.channel_state(), ChannelState::Closed);
    assert!(!conversation.is_waiting());

    assert_eq!(wait_for_close_code(&state).await, Some(4000));
}

#[tokio::test]
async fn malformed_frame_closes_channel_and_keeps_session() {
    let (base_url, state) = spawn_gateway().await;
    let (mut conversation, mut events) = conversation_for(&base_url);

    conversation.submit("garbage please").await;
    pump_until(&mut conversation, &mut events, |c, _| {
        c.channel_state() == ChannelState::Closing
    })
    .await;
    assert_eq!(wait_for_close_code(&state).await, Some(1002));

    // The server going away completes the close
    pump_until(&mut conversation, &mut events, |c, _| {
        c.channel_state() == ChannelState::Closed
    })
    .await;

    assert_eq!(conversation.session_id().unwrap().as_str(), SESSION_ID);
    let notices = conversation.take_notices();
    assert!(notices
        .iter()
        .any(|n| n.level == NoticeLevel::Error && n.text.starts_with("Protocol error")));
}
