//! Merging YAML overrides onto the environment configuration.

use std::path::PathBuf;

use super::env::{load_from_env, tls_from_paths};
use super::instructions::load_instructions;
use super::yaml::YamlConfig;
use super::ServerConfig;

/// Load the environment configuration and apply YAML overrides on top.
///
/// Priority (highest first): YAML, environment variables, `.env` values, defaults.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(tls) = server.tls {
            if tls.enabled == Some(false) {
                config.tls = None;
            } else if tls.enabled == Some(true) || tls.cert_path.is_some() || tls.key_path.is_some()
            {
                config.tls = tls_from_paths(tls.cert_path, tls.key_path, "server.tls")?;
                if config.tls.is_none() {
                    return Err("server.tls: enabled without cert_path and key_path".into());
                }
            }
        }
    }

    if let Some(gemini) = yaml.gemini {
        if let Some(api_key) = gemini.api_key {
            config.gemini_api_key = api_key;
        }
        if let Some(model) = gemini.model {
            config.gemini_model = model;
        }
        if let Some(base_url) = gemini.base_url {
            config.gemini_base_url = base_url;
        }
        if gemini.temperature.is_some() {
            config.temperature = gemini.temperature;
        }
        if gemini.max_output_tokens.is_some() {
            config.max_output_tokens = gemini.max_output_tokens;
        }
    }

    if let Some(assistant) = yaml.assistant {
        if let Some(instructions) = assistant.instructions {
            config.system_instructions = instructions;
        } else if let Some(path) = assistant.instructions_path {
            config.system_instructions = load_instructions(&PathBuf::from(path))?;
        }
        if let Some(seconds) = assistant.turn_timeout_seconds {
            config.turn_timeout_seconds = seconds;
        }
        if let Some(seconds) = assistant.idle_timeout_seconds {
            config.idle_timeout_seconds = seconds;
        }
    }

    if let Some(security) = yaml.security {
        if security.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = security.cors_allowed_origins;
        }
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if security.max_websocket_connections.is_some() {
            config.max_websocket_connections = security.max_websocket_connections;
        }
        if let Some(per_ip) = security.max_connections_per_ip {
            config.max_connections_per_ip = per_ip;
        }
    }

    Ok(config)
}
