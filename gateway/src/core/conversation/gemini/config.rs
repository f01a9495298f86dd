//! Gemini conversation configuration.

use zeroize::Zeroizing;

/// Google Generative Language REST API base URL.
pub const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when none is configured.
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Header carrying the API key.
pub const GEMINI_API_KEY_HEADER: &str = "x-goog-api-key";

/// Configuration shared by every Gemini conversation in the process.
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key for the Generative Language API, wiped from memory on drop
    pub api_key: Zeroizing<String>,
    /// Model name, with or without the `models/` prefix
    pub model: String,
    /// API base URL, without a trailing slash
    pub base_url: String,
    /// Domain-scoping instruction sent as the first turn of every conversation
    pub system_instructions: String,
    /// Sampling temperature (0.0 to 2.0)
    pub temperature: Option<f32>,
    /// Maximum number of tokens in one reply
    pub max_output_tokens: Option<u32>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: Zeroizing::new(String::new()),
            model: GEMINI_DEFAULT_MODEL.to_string(),
            base_url: GEMINI_API_BASE_URL.to_string(),
            system_instructions: String::new(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("system_instructions_len", &self.system_instructions.len())
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

impl GeminiConfig {
    /// Model name without the `models/` prefix.
    pub fn model_name(&self) -> &str {
        self.model.strip_prefix("models/").unwrap_or(&self.model)
    }

    /// URL of the unary `generateContent` method.
    pub fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model_name()
        )
    }

    /// URL of the `streamGenerateContent` method in SSE mode.
    pub fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model_name()
        )
    }
}
