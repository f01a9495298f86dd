//! Google Gemini conversation provider.
//!
//! Talks to the Generative Language REST API: the domain-scoping instruction
//! is sent with `generateContent` when the conversation starts, and each user
//! turn is streamed back through `streamGenerateContent?alt=sse`.

mod client;
mod config;
pub mod messages;

pub use client::{GeminiConversation, GeminiConversationFactory};
pub use config::{GEMINI_API_BASE_URL, GEMINI_API_KEY_HEADER, GEMINI_DEFAULT_MODEL, GeminiConfig};
