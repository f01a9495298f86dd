//! Base traits and types for upstream conversation providers.
//!
//! A conversation provider wraps one logical conversation with an upstream
//! conversational-AI backend. Every provider exposes the same three-step
//! contract:
//!
//! 1. [`BaseConversation::start`] opens the conversation and primes it with
//!    the domain-scoping instruction before any user turn is accepted.
//! 2. [`BaseConversation::send_turn`] submits one user turn and returns a lazy,
//!    finite stream of text fragments.
//! 3. [`BaseConversation::close`] releases the conversation.
//!
//! Providers enforce no concurrency internally. The returned
//! [`FragmentStream`] mutably borrows the conversation, so a second turn cannot
//! be submitted until the previous stream has been drained or dropped.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while talking to an upstream conversation provider.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Turn submitted before the conversation was started
    #[error("Conversation not started")]
    NotStarted,

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

/// Result type for conversation operations.
pub type ConversationResult<T> = Result<T, ConversationError>;

// =============================================================================
// Turn Content
// =============================================================================

/// Content of a single user turn, as forwarded to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnContent {
    /// Plain text turn
    Text(String),
    /// Recorded audio turn
    Audio {
        /// Raw audio bytes, exactly as captured by the client
        data: Bytes,
        /// MIME type of the audio container (e.g. `audio/webm`)
        mime_type: String,
    },
}

impl TurnContent {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnContent::Text(_) => "text",
            TurnContent::Audio { .. } => "audio",
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            TurnContent::Text(text) => text.len(),
            TurnContent::Audio { data, .. } => data.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for TurnContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnContent::Text(text) => write!(f, "text({} bytes)", text.len()),
            TurnContent::Audio { data, mime_type } => {
                write!(f, "audio({}, {} bytes)", mime_type, data.len())
            }
        }
    }
}

// =============================================================================
// Fragment Stream
// =============================================================================

/// Lazy, finite, non-restartable sequence of generated text fragments.
///
/// The stream ends with `None` once the provider signals completion. A failure
/// is delivered as a single `Err` item; no items follow it.
pub type FragmentStream<'a> =
    Pin<Box<dyn Stream<Item = ConversationResult<String>> + Send + 'a>>;

// =============================================================================
// Base Trait
// =============================================================================

/// Base trait for upstream conversation providers.
///
/// # Example
///
/// ```rust,ignore
/// use futures::StreamExt;
/// use voicechat_gateway::core::conversation::{BaseConversation, TurnContent};
///
/// let mut conversation = factory.create()?;
/// conversation.start().await?;
///
/// let mut fragments = conversation.send_turn(TurnContent::Text("Hi".to_string()));
/// while let Some(fragment) = fragments.next().await {
///     print!("{}", fragment?);
/// }
/// drop(fragments);
///
/// conversation.close().await?;
/// ```
#[async_trait]
pub trait BaseConversation: Send + Sync {
    /// Open the conversation and transmit the domain-scoping instruction.
    ///
    /// Calling `start` again on a started conversation resets it.
    async fn start(&mut self) -> ConversationResult<()>;

    /// Submit one user turn and stream the reply.
    fn send_turn(&mut self, content: TurnContent) -> FragmentStream<'_>;

    /// Close the conversation and drop any retained history.
    async fn close(&mut self) -> ConversationResult<()>;

    /// Whether `start` has completed successfully and `close` has not been called.
    fn is_started(&self) -> bool;

    /// Get provider information.
    fn get_provider_info(&self) -> serde_json::Value;
}

/// Boxed trait object for conversation providers.
pub type BoxedConversation = Box<dyn BaseConversation>;

// =============================================================================
// Factory
// =============================================================================

/// Creates one fresh conversation per client session.
///
/// The factory is shared process-wide; each call must return an independent
/// conversation that no other session can observe.
pub trait ConversationFactory: Send + Sync {
    /// Create a new, not yet started conversation.
    fn create(&self) -> ConversationResult<BoxedConversation>;

    /// Provider name used in logs.
    fn provider_name(&self) -> &str;
}
