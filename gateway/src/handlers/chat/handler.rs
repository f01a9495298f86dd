//! Chat WebSocket handler
//!
//! Validates the client identifier, claims it in the session registry and
//! upgrades the connection. The upgraded socket is adapted into a [`Frame`]
//! stream and a [`ServerEvent`] sink and handed to a [`Session`].

use axum::{
    Extension,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt, future};
use std::sync::Arc;
use tracing::{info, warn};

use super::messages::{Frame, ServerEvent};
use super::session::{Session, TransportError};
use crate::registry::SessionGuard;
use crate::state::{AppState, ConnectionPermit};

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Maximum client identifier length
pub const MAX_CLIENT_ID_LENGTH: usize = 128;

/// Client identifiers are 1 to 128 characters of `[A-Za-z0-9_.-]`.
pub fn is_valid_client_id(client_id: &str) -> bool {
    !client_id.is_empty()
        && client_id.len() <= MAX_CLIENT_ID_LENGTH
        && client_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Chat WebSocket handler for `GET /ws/{client_id}`.
///
/// Responds `400` for a malformed identifier and `409` when the identifier is
/// already connected. The registry entry and the connection permit are held
/// until the session ends.
pub async fn chat_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
    permit: Option<Extension<ConnectionPermit>>,
) -> Response {
    if !is_valid_client_id(&client_id) {
        warn!(client_id = %client_id, "Rejecting chat connection: invalid client id");
        return (
            StatusCode::BAD_REQUEST,
            "Client id must be 1-128 characters of letters, digits, '_', '.' or '-'",
        )
            .into_response();
    }

    let guard = match state.registry.register(&client_id) {
        Ok(guard) => guard,
        Err(e) => {
            warn!(client_id = %client_id, "Rejecting chat connection: {}", e);
            return (StatusCode::CONFLICT, e.to_string()).into_response();
        }
    };
    let permit = permit.map(|Extension(permit)| permit);

    info!(client_id = %client_id, "Chat WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_chat_socket(socket, state, guard, permit))
}

/// Run one chat session over an upgraded socket.
async fn handle_chat_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    guard: SessionGuard,
    permit: Option<ConnectionPermit>,
) {
    let client_id = guard.id().to_string();
    info!(client_id = %client_id, "Chat WebSocket connection established");

    let (sender, receiver) = socket.split();

    let mut inbound =
        std::pin::pin!(receiver.filter_map(|message| future::ready(frame_from_message(message))));
    let mut outbound = std::pin::pin!(
        sender
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|event: ServerEvent| {
                future::ready(Ok::<_, TransportError>(Message::Text(event.encode().into())))
            })
    );

    let mut session = Session::new(
        client_id.clone(),
        state.conversations.clone(),
        state.session_settings(),
    );
    let reason = session
        .run(&mut inbound, &mut outbound, &state.shutdown)
        .await;

    drop(guard);
    drop(permit);
    info!(
        client_id = %client_id,
        turns = session.turns(),
        reason = ?reason,
        "Chat WebSocket connection terminated"
    );
}

/// Map a WebSocket message onto a protocol frame. Control frames are consumed by the transport.
fn frame_from_message(
    message: Result<Message, axum::Error>,
) -> Option<Result<Frame, TransportError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
        Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
    }
}
