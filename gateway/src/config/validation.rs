//! Configuration validation.

use super::{ServerConfig, TlsConfig};

/// Validate the upstream Gemini settings.
///
/// The API key is mandatory: the server refuses to start without it.
pub(super) fn validate_gemini(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.gemini_api_key.trim().is_empty() {
        return Err(
            "GEMINI_API_KEY is required (set it in the environment, .env or gemini.api_key)".into(),
        );
    }

    if config.gemini_model.trim().is_empty() {
        return Err("GEMINI_MODEL must not be empty".into());
    }

    let base_url = url::Url::parse(&config.gemini_base_url)
        .map_err(|e| format!("Invalid GEMINI_BASE_URL '{}': {e}", config.gemini_base_url))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(format!(
            "Invalid GEMINI_BASE_URL '{}': scheme must be http or https",
            config.gemini_base_url
        )
        .into());
    }

    if let Some(temperature) = config.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(format!(
                "GEMINI_TEMPERATURE must be between 0.0 and 2.0, got {temperature}"
            )
            .into());
        }
    }

    if config.max_output_tokens == Some(0) {
        return Err("GEMINI_MAX_OUTPUT_TOKENS must be greater than 0".into());
    }

    if config.system_instructions.trim().is_empty() {
        return Err("System instructions must not be empty".into());
    }

    Ok(())
}

/// Validate that configured TLS files exist.
pub(super) fn validate_tls(tls: &Option<TlsConfig>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(tls) = tls {
        if !tls.cert_path.exists() {
            return Err(format!(
                "TLS certificate file not found: {}",
                tls.cert_path.display()
            )
            .into());
        }
        if !tls.key_path.exists() {
            return Err(format!("TLS key file not found: {}", tls.key_path.display()).into());
        }
    }
    Ok(())
}

/// Validate rate limiting and connection limits.
pub(super) fn validate_security(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.rate_limit_requests_per_second == 0 {
        return Err("RATE_LIMIT_REQUESTS_PER_SECOND must be greater than 0".into());
    }
    if config.rate_limit_burst_size == 0 {
        return Err("RATE_LIMIT_BURST_SIZE must be greater than 0".into());
    }
    if config.max_websocket_connections == Some(0) {
        return Err("MAX_WEBSOCKET_CONNECTIONS must be greater than 0".into());
    }
    if config.max_connections_per_ip == 0 {
        return Err("MAX_CONNECTIONS_PER_IP must be greater than 0".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        let config = test_config();
        assert!(validate_gemini(&config).is_ok());
        assert!(validate_security(&config).is_ok());
        assert!(validate_tls(&config.tls).is_ok());
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = test_config();
        config.gemini_api_key = String::new();
        let err = validate_gemini(&config).unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY is required"));
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = test_config();
        config.gemini_base_url = "not a url".to_string();
        assert!(validate_gemini(&config).is_err());

        config.gemini_base_url = "ftp://example.com/v1beta".to_string();
        let err = validate_gemini(&config).unwrap_err();
        assert!(err.to_string().contains("scheme must be http or https"));
    }

    #[test]
    fn test_temperature_range() {
        let mut config = test_config();
        config.temperature = Some(2.5);
        assert!(validate_gemini(&config).is_err());

        config.temperature = Some(2.0);
        assert!(validate_gemini(&config).is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = test_config();
        config.rate_limit_requests_per_second = 0;
        assert!(validate_security(&config).is_err());

        let mut config = test_config();
        config.max_websocket_connections = Some(0);
        assert!(validate_security(&config).is_err());
    }

    #[test]
    fn test_missing_tls_files() {
        let tls = Some(TlsConfig {
            cert_path: PathBuf::from("/nonexistent/cert.pem"),
            key_path: PathBuf::from("/nonexistent/key.pem"),
        });
        let err = validate_tls(&tls).unwrap_err();
        assert!(err.to_string().contains("TLS certificate file not found"));
    }
}
