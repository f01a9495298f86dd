//! Chat WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::chat::chat_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the chat WebSocket router
///
/// # Endpoint
///
/// `GET /ws/{client_id}` - WebSocket upgrade for one relay session
///
/// # Protocol
///
/// ```json
/// // Client sends a turn
/// {"type": "text", "text": "Tell me about the RV400"}
///
/// // Server streams the reply
/// {"type": "response_chunk", "text": "The RV400 "}
/// {"type": "response_chunk", "text": "has a range of 150 km."}
/// {"type": "response_end"}
///
/// // Keepalive
/// {"type": "ping"}
/// {"type": "pong"}
/// ```
///
/// Audio turns carry base64 data: `{"type": "audio", "audio_data": "...", "mime_type": "audio/webm"}`.
pub fn create_chat_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/{client_id}", get(chat_handler))
        .layer(TraceLayer::new_for_http())
}
