//! Chat relay over WebSocket
//!
//! Clients connect to `/ws/{client_id}` and exchange JSON frames:
//!
//! - inbound: `{"type":"audio","audio_data":<base64>,"mime_type":...}`,
//!   `{"type":"text","text":...}`, `{"type":"ping"}`
//! - outbound: `response_chunk`, `response_end`, `error`, `pong`
//!
//! Each turn yields zero or more `response_chunk` events followed by exactly
//! one `response_end` or `error`.

mod handler;
pub mod messages;
pub mod session;

pub use handler::{MAX_CLIENT_ID_LENGTH, chat_handler, is_valid_client_id};
pub use messages::{Frame, ProtocolError, ServerEvent, Turn, decode, decode_frame};
pub use session::{CloseReason, Session, SessionSettings, SessionState, TransportError};
