//! Upstream conversation providers.
//!
//! A conversation relays user turns to a conversational-AI backend and
//! streams the generated reply back as text fragments.
//!
//! # Supported Providers
//!
//! - **Google Gemini** - Generative Language REST API with SSE streaming
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use voicechat_gateway::core::conversation::{
//!     ConversationFactory, GeminiConfig, GeminiConversationFactory, TurnContent,
//! };
//!
//! let factory = GeminiConversationFactory::new(GeminiConfig {
//!     api_key: "your-api-key".to_string().into(),
//!     system_instructions: "You are Rev.".to_string(),
//!     ..Default::default()
//! })?;
//!
//! let mut conversation = factory.create()?;
//! conversation.start().await?;
//!
//! let mut fragments = conversation.send_turn(TurnContent::Text("Hello".to_string()));
//! while let Some(fragment) = fragments.next().await {
//!     print!("{}", fragment?);
//! }
//! ```

mod base;
pub mod gemini;
pub mod sse;

pub use base::{
    BaseConversation, BoxedConversation, ConversationError, ConversationFactory,
    ConversationResult, FragmentStream, TurnContent,
};
pub use gemini::{
    GEMINI_API_BASE_URL, GEMINI_DEFAULT_MODEL, GeminiConfig, GeminiConversation,
    GeminiConversationFactory,
};
