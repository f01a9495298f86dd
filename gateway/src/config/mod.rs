//! Configuration module for the voice chat gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `instructions`: The built-in domain-scoping instruction
//!
//! # Example
//! ```rust,no_run
//! use voicechat_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::core::conversation::GeminiConfig;

mod env;
pub mod instructions;
mod merge;
mod validation;
mod yaml;

pub use instructions::DEFAULT_SYSTEM_INSTRUCTIONS;

pub(crate) const DEFAULT_HOST: &str = "0.0.0.0";
pub(crate) const DEFAULT_PORT: u16 = 8000;
pub(crate) const DEFAULT_TURN_TIMEOUT_SECONDS: u64 = 60;
pub(crate) const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 300;
pub(crate) const DEFAULT_RATE_LIMIT_RPS: u32 = 60;
pub(crate) const DEFAULT_RATE_LIMIT_BURST_SIZE: u32 = 10;
pub(crate) const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port, TLS)
/// - Upstream Gemini settings and the domain-scoping instruction
/// - Session timeouts
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Upstream Gemini settings
    /// Gemini API key. Required.
    pub gemini_api_key: String,
    /// Model name (e.g., "gemini-1.5-flash")
    pub gemini_model: String,
    /// Generative Language API base URL
    pub gemini_base_url: String,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens per reply
    pub max_output_tokens: Option<u32>,
    /// Instruction sent as the implicit first turn of every conversation
    pub system_instructions: String,

    // Session settings
    /// Bound on upstream start and on the gap between streamed fragments.
    /// 0 disables the bound. Default: 60
    pub turn_timeout_seconds: u64,
    /// Close connections with no inbound frame for this long.
    /// 0 disables the check. Default: 300
    pub idle_timeout_seconds: u64,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

/// Wipe the API key from memory when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.gemini_api_key.zeroize();
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("gemini_api_key", &"<redacted>")
            .field("gemini_model", &self.gemini_model)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("system_instructions_len", &self.system_instructions.len())
            .field("turn_timeout_seconds", &self.turn_timeout_seconds)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("rate_limit_requests_per_second", &self.rate_limit_requests_per_second)
            .field("rate_limit_burst_size", &self.rate_limit_burst_size)
            .field("max_websocket_connections", &self.max_websocket_connections)
            .field("max_connections_per_ip", &self.max_connections_per_ip)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Reads the process environment (including values loaded from `.env` in
    /// `main`), fills in defaults and validates the result.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format, `GEMINI_API_KEY`
    /// is missing, or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_gemini(self)?;
        validation::validate_tls(&self.tls)?;
        validation::validate_security(self)?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Bound on upstream start and inter-fragment gaps, `None` when disabled.
    pub fn turn_timeout(&self) -> Option<Duration> {
        (self.turn_timeout_seconds > 0).then(|| Duration::from_secs(self.turn_timeout_seconds))
    }

    /// Inactivity limit for connections, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_seconds > 0).then(|| Duration::from_secs(self.idle_timeout_seconds))
    }

    /// Settings for the upstream Gemini conversations.
    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: Zeroizing::new(self.gemini_api_key.clone()),
            model: self.gemini_model.clone(),
            base_url: self.gemini_base_url.clone(),
            system_instructions: self.system_instructions.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }
}
