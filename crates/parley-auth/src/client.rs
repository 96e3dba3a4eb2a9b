//! Token refresh client.
//!
//! Exchanges a refresh token for a new access token at the auth server's
//! refresh endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::AuthConfig;

/// Request payload for refreshing an access token.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    /// The refresh token obtained at login.
    pub refresh_token: String,
}

/// A freshly issued token pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    /// JWT access token.
    pub access_token: String,
    /// Rotated refresh token, if the server rotates them.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Error response from the auth server.
#[derive(Debug, Deserialize)]
struct AuthErrorResponse {
    code: String,
}

/// Client for the auth server's refresh endpoint.
#[derive(Debug, Clone)]
pub struct RefreshClient {
    config: AuthConfig,
    client: reqwest::Client,
}

impl RefreshClient {
    /// Create a new refresh client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Request` if the HTTP client cannot be built.
    pub fn new(config: AuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AuthError::Request(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The refresh token is rejected (`RefreshRejected`)
    /// - Rate limit is exceeded (`RateLimited`)
    /// - Network or server error occurs (`Request`)
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let url = self.config.refresh_url();
        let req = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenPair>()
                .await
                .map_err(|e| AuthError::Request(format!("invalid response: {e}")));
        }

        if status.as_u16() == 429 {
            return Err(AuthError::RateLimited);
        }

        let message = match response.json::<AuthErrorResponse>().await {
            Ok(err) => err.code,
            Err(_) => format!("HTTP {status}"),
        };
        Err(AuthError::RefreshRejected {
            status: status.as_u16(),
            message,
        })
    }
}
