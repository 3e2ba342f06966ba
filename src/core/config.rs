//! Configuration management for the relay.
//!
//! All settings are plain scalars read from the environment (after
//! `dotenvy` has loaded any `.env` file in `main`).

use crate::services::redaction::ThinkingFilterMode;
use crate::transformer::Dialect;
use anyhow::{Context, Result};

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server configuration (host, port)
    pub server: ServerConfig,

    /// Upstream target; `None` leaves the relay running but unconfigured
    pub upstream: Option<UpstreamConfig>,

    /// Thinking-channel filter mode applied to every call
    pub thinking_filter_mode: ThinkingFilterMode,

    /// Whether to verify SSL certificates for upstream requests
    pub verify_ssl: bool,
}

/// Upstream coordinates and dialect.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub dialect: Dialect,
    /// Overrides the model named by the caller when set
    pub model: Option<String>,
}

/// Server-specific configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    18000
}

impl AppConfig {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let mut server = ServerConfig::default();
        if let Some(host) = env_non_empty("HOST") {
            server.host = host;
        }
        if let Some(port) = env_non_empty("PORT") {
            server.port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }

        let thinking_filter_mode = match env_non_empty("THINKING_FILTER_MODE") {
            Some(raw) => raw
                .parse::<ThinkingFilterMode>()
                .map_err(anyhow::Error::msg)
                .context("Invalid THINKING_FILTER_MODE")?,
            None => ThinkingFilterMode::default(),
        };

        let verify_ssl = env_non_empty("VERIFY_SSL")
            .map(|v| str_to_bool(&v))
            .unwrap_or(true);

        let upstream = match env_non_empty("UPSTREAM_BASE_URL") {
            Some(base_url) => {
                let dialect = match env_non_empty("UPSTREAM_DIALECT") {
                    Some(raw) => raw
                        .parse::<Dialect>()
                        .map_err(anyhow::Error::msg)
                        .context("Invalid UPSTREAM_DIALECT")?,
                    None => Dialect::ChatCompletions,
                };
                Some(UpstreamConfig {
                    base_url,
                    api_key: env_non_empty("UPSTREAM_API_KEY").unwrap_or_default(),
                    dialect,
                    model: env_non_empty("UPSTREAM_MODEL"),
                })
            }
            None => None,
        };

        Ok(Self {
            server,
            upstream,
            thinking_filter_mode,
            verify_ssl,
        })
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
