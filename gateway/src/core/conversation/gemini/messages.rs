//! Gemini `generateContent` wire types.
//!
//! Only the subset of the API the relay needs is modelled. Unknown response
//! fields are ignored.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::conversation::base::{ConversationError, TurnContent};

/// Role of the user side of the conversation.
pub const ROLE_USER: &str = "user";

/// Role of the model side of the conversation.
pub const ROLE_MODEL: &str = "model";

// =============================================================================
// Content
// =============================================================================

/// One conversation entry: a role plus its ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One part of a content entry. Exactly one field is set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Inline binary payload, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl Content {
    /// User entry holding a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ROLE_USER.to_string(),
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }

    /// Model entry holding a single text part.
    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: ROLE_MODEL.to_string(),
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }

    /// User entry for a relayed turn.
    pub fn from_turn(content: &TurnContent) -> Self {
        match content {
            TurnContent::Text(text) => Self::user_text(text.clone()),
            TurnContent::Audio { data, mime_type } => Self {
                role: ROLE_USER.to_string(),
                parts: vec![Part {
                    text: None,
                    inline_data: Some(Blob {
                        mime_type: mime_type.clone(),
                        data: BASE64_STANDARD.encode(data),
                    }),
                }],
            },
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// Sampling settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl GenerationConfig {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.max_output_tokens.is_none()
    }
}

/// Body of `generateContent` and `streamGenerateContent`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest<'a> {
    pub contents: Vec<&'a Content>,
    #[serde(skip_serializing_if = "GenerationConfig::is_empty")]
    pub generation_config: GenerationConfig,
}

// =============================================================================
// Response
// =============================================================================

/// One (possibly partial) `generateContent` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

/// Error object returned by the API, both as an HTTP error body and inline in a stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// HTTP error envelope: `{"error": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

impl GenerateContentResponse {
    /// Non-empty text parts of the first candidate, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.as_deref())
            .filter(|text| !text.is_empty())
    }

    /// Concatenated text of the first candidate.
    pub fn text(&self) -> String {
        self.texts().collect()
    }

    /// Fail if the response carries an error object or a blocked prompt.
    pub fn check(&self) -> Result<(), ConversationError> {
        if let Some(error) = &self.error {
            return Err(ConversationError::ProviderError(error.describe()));
        }
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Err(ConversationError::ProviderError(format!(
                "Prompt blocked: {reason}"
            )));
        }
        Ok(())
    }
}

impl ApiErrorBody {
    /// Human-readable message, falling back to the status code.
    pub fn describe(&self) -> String {
        match (&self.status, self.message.is_empty()) {
            (_, false) => self.message.clone(),
            (Some(status), true) => status.clone(),
            (None, true) => format!("error code {}", self.code.unwrap_or_default()),
        }
    }
}
