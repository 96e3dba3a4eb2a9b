//! Client configuration.
//!
//! Values come from an optional JSON file; command-line flags and environment
//! variables override individual fields.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for the conversation client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Gateway base URL (e.g., `http://localhost:8080`).
    #[serde(default = "ClientConfig::default_gateway_url")]
    pub gateway_url: String,

    /// Agent to converse with.
    #[serde(default = "ClientConfig::default_agent_name")]
    pub agent_name: String,

    /// Minimum time the waiting indicator stays visible, in milliseconds.
    #[serde(default = "ClientConfig::default_min_waiting")]
    pub min_waiting_ms: u64,

    /// Minimum remaining token validity before opening a channel, in seconds.
    #[serde(default = "ClientConfig::default_token_min_validity")]
    pub token_min_validity_seconds: u64,

    /// HTTP request timeout in seconds.
    #[serde(default = "ClientConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ClientConfig {
    fn default_gateway_url() -> String {
        "http://localhost:8080".to_string()
    }

    fn default_agent_name() -> String {
        "assistant".to_string()
    }

    const fn default_min_waiting() -> u64 {
        200
    }

    const fn default_token_min_validity() -> u64 {
        30
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Gateway URL without a trailing slash.
    #[must_use]
    pub fn api_base(&self) -> &str {
        self.gateway_url.trim_end_matches('/')
    }

    /// WebSocket URL of the conversation stream endpoint.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let base = self.api_base();
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}/v1/stream")
    }

    /// Get the minimum waiting duration as a `Duration`.
    #[must_use]
    pub const fn min_waiting(&self) -> Duration {
        Duration::from_millis(self.min_waiting_ms)
    }

    /// Get the token minimum validity as a `Duration`.
    #[must_use]
    pub const fn token_min_validity(&self) -> Duration {
        Duration::from_secs(self.token_min_validity_seconds)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: Self::default_gateway_url(),
            agent_name: Self::default_agent_name(),
            min_waiting_ms: Self::default_min_waiting(),
            token_min_validity_seconds: Self::default_token_min_validity(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}
