pub mod conversation;

// Re-export commonly used types for convenience
pub use conversation::{
    BaseConversation, BoxedConversation, ConversationError, ConversationFactory,
    ConversationResult, FragmentStream, GeminiConfig, GeminiConversation,
    GeminiConversationFactory, TurnContent,
};
