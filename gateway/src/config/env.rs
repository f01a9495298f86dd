//! Environment variable loading.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::instructions::{DEFAULT_SYSTEM_INSTRUCTIONS, load_instructions};
use super::{
    DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_MAX_CONNECTIONS_PER_IP, DEFAULT_PORT,
    DEFAULT_RATE_LIMIT_BURST_SIZE, DEFAULT_RATE_LIMIT_RPS, DEFAULT_TURN_TIMEOUT_SECONDS,
    ServerConfig, TlsConfig,
};
use crate::core::conversation::{GEMINI_API_BASE_URL, GEMINI_DEFAULT_MODEL};

/// Read a variable, treating empty values as unset.
pub(super) fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read and parse a variable, treating empty values as unset.
pub(super) fn env_parse<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name} '{value}': {e}").into()),
        None => Ok(None),
    }
}

/// Build TLS settings from a certificate/key pair; both or neither must be set.
pub(super) fn tls_from_paths(
    cert_path: Option<String>,
    key_path: Option<String>,
    source: &str,
) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => Ok(Some(TlsConfig {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        })),
        (None, None) => Ok(None),
        _ => Err(format!("{source}: TLS requires both a certificate path and a key path").into()),
    }
}

/// Load configuration from environment variables with defaults.
///
/// No validation is performed here; see [`ServerConfig::from_env`].
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let tls = tls_from_paths(
        env_string("TLS_CERT_PATH"),
        env_string("TLS_KEY_PATH"),
        "TLS_CERT_PATH/TLS_KEY_PATH",
    )?;

    let system_instructions = match env_string("SYSTEM_INSTRUCTIONS_PATH") {
        Some(path) => load_instructions(&PathBuf::from(path))?,
        None => DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
    };

    Ok(ServerConfig {
        host: env_string("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env_parse("PORT")?.unwrap_or(DEFAULT_PORT),
        tls,
        gemini_api_key: env_string("GEMINI_API_KEY").unwrap_or_default(),
        gemini_model: env_string("GEMINI_MODEL")
            .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
        gemini_base_url: env_string("GEMINI_BASE_URL")
            .unwrap_or_else(|| GEMINI_API_BASE_URL.to_string()),
        temperature: env_parse("GEMINI_TEMPERATURE")?,
        max_output_tokens: env_parse("GEMINI_MAX_OUTPUT_TOKENS")?,
        system_instructions,
        turn_timeout_seconds: env_parse("TURN_TIMEOUT_SECONDS")?
            .unwrap_or(DEFAULT_TURN_TIMEOUT_SECONDS),
        idle_timeout_seconds: env_parse("IDLE_TIMEOUT_SECONDS")?
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECONDS),
        cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
        rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND")?
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE")?
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST_SIZE),
        max_websocket_connections: env_parse("MAX_WEBSOCKET_CONNECTIONS")?,
        max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),
    })
}
