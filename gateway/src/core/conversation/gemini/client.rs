//! Gemini conversation over the Generative Language REST API.
//!
//! History is kept client-side: every turn posts the full conversation so
//! far plus the new user content to `streamGenerateContent` and reads the
//! reply as Server-Sent Events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use super::config::{GEMINI_API_KEY_HEADER, GeminiConfig};
use super::messages::{
    ApiErrorEnvelope, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
};
use crate::core::conversation::base::{
    BaseConversation, BoxedConversation, ConversationError, ConversationFactory,
    ConversationResult, FragmentStream, TurnContent,
};
use crate::core::conversation::sse::parse_sse;

/// Connect timeout for the shared HTTP client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle connections are dropped from the pool after this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

// =============================================================================
// GeminiConversation
// =============================================================================

/// One Gemini conversation, exclusively owned by a single session.
pub struct GeminiConversation {
    config: Arc<GeminiConfig>,
    http: reqwest::Client,
    history: Vec<Content>,
    started: bool,
}

impl GeminiConversation {
    /// Create a conversation using the given shared HTTP client.
    pub fn new(config: Arc<GeminiConfig>, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            history: Vec::new(),
            started: false,
        }
    }

    #[cfg(test)]
    fn history(&self) -> &[Content] {
        &self.history
    }

    fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        }
    }

    /// POST a request body and map non-success statuses to errors.
    async fn post(
        &self,
        url: &str,
        request: &GenerateContentRequest<'_>,
    ) -> ConversationResult<reqwest::Response> {
        let response = self
            .http
            .post(url)
            .header(GEMINI_API_KEY_HEADER, self.config.api_key.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| ConversationError::ConnectionFailed(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

/// Map an HTTP error status and body to a conversation error.
fn status_error(status: StatusCode, body: &str) -> ConversationError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|envelope| envelope.error.describe())
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body.trim().to_string()
            }
        });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ConversationError::AuthenticationFailed(message)
        }
        StatusCode::TOO_MANY_REQUESTS => ConversationError::RateLimitExceeded(message),
        _ => ConversationError::ProviderError(format!("{status}: {message}")),
    }
}

#[async_trait]
impl BaseConversation for GeminiConversation {
    async fn start(&mut self) -> ConversationResult<()> {
        self.history.clear();
        self.started = false;

        if self.config.system_instructions.trim().is_empty() {
            debug!("No system instructions configured, skipping priming call");
            self.started = true;
            return Ok(());
        }

        let instructions = Content::user_text(self.config.system_instructions.clone());
        let request = GenerateContentRequest {
            contents: vec![&instructions],
            generation_config: self.generation_config(),
        };

        let response: GenerateContentResponse = self
            .post(&self.config.generate_url(), &request)
            .await?
            .json()
            .await
            .map_err(|e| {
                ConversationError::SerializationError(format!("Invalid Gemini response: {e}"))
            })?;
        response.check()?;

        let acknowledgement = response.text();
        self.history.push(instructions);
        if !acknowledgement.is_empty() {
            self.history.push(Content::model_text(acknowledgement));
        }
        self.started = true;

        info!(model = %self.config.model_name(), "Gemini conversation started");
        Ok(())
    }

    fn send_turn(&mut self, content: TurnContent) -> FragmentStream<'_> {
        Box::pin(async_stream::stream! {
            if !self.started {
                yield Err(ConversationError::NotStarted);
                return;
            }

            let user = Content::from_turn(&content);
            let response = {
                let mut contents: Vec<&Content> = self.history.iter().collect();
                contents.push(&user);
                let request = GenerateContentRequest {
                    contents,
                    generation_config: self.generation_config(),
                };
                self.post(&self.config.stream_url(), &request).await
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let body = response.bytes_stream().map_err(std::io::Error::other);
            let mut events = Box::pin(parse_sse(body));
            let mut reply = String::new();
            let mut fragments = 0usize;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(ConversationError::ConnectionFailed(format!(
                            "Gemini stream interrupted: {e}"
                        )));
                        return;
                    }
                };

                let chunk: GenerateContentResponse = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "Unparseable Gemini stream event");
                        yield Err(ConversationError::SerializationError(format!(
                            "Invalid Gemini stream event: {e}"
                        )));
                        return;
                    }
                };
                if let Err(e) = chunk.check() {
                    yield Err(e);
                    return;
                }

                for text in chunk.texts() {
                    reply.push_str(text);
                    fragments += 1;
                    yield Ok(text.to_string());
                }
            }

            if reply.is_empty() {
                // Gemini rejects empty model parts, so an unanswered turn is forgotten
                warn!(kind = content.kind(), "Gemini returned no text, turn left out of history");
                return;
            }
            debug!(kind = content.kind(), fragments, "Gemini turn completed");
            self.history.push(user);
            self.history.push(Content::model_text(reply));
        })
    }

    async fn close(&mut self) -> ConversationResult<()> {
        self.history.clear();
        self.started = false;
        debug!("Gemini conversation closed");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn get_provider_info(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": "gemini",
            "model": self.config.model_name(),
            "api_type": "REST/SSE",
            "supports_audio_input": true,
            "history_entries": self.history.len(),
        })
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates Gemini conversations that share one pooled HTTP client.
#[derive(Debug, Clone)]
pub struct GeminiConversationFactory {
    config: Arc<GeminiConfig>,
    http: reqwest::Client,
}

impl GeminiConversationFactory {
    /// Build the factory and its shared HTTP client.
    pub fn new(config: GeminiConfig) -> ConversationResult<Self> {
        if config.api_key.is_empty() {
            return Err(ConversationError::InvalidConfiguration(
                "Gemini API key is required".to_string(),
            ));
        }
        if config.model_name().is_empty() {
            return Err(ConversationError::InvalidConfiguration(
                "Gemini model is required".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .map_err(|e| {
                ConversationError::InvalidConfiguration(format!(
                    "Failed to create HTTP client: {e}"
                ))
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// Shared configuration.
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }
}

impl ConversationFactory for GeminiConversationFactory {
    fn create(&self) -> ConversationResult<BoxedConversation> {
        Ok(Box::new(GeminiConversation::new(
            self.config.clone(),
            self.http.clone(),
        )))
    }

    fn provider_name(&self) -> &str {
        "gemini"
    }
}
