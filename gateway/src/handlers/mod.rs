//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `chat` - Conversational relay WebSocket

pub mod api;
pub mod chat;

pub use chat::chat_handler;
