//! Access token provisioning for parley clients.
//!
//! This crate provides the narrow authentication contract the conversation
//! engine consumes:
//!
//! - [`TokenProvider`]: hands out the current token and refreshes it on demand
//! - [`StaticTokenProvider`]: a fixed token (API keys, tokens passed on the CLI)
//! - [`RefreshingTokenProvider`]: rotates JWTs through the auth server's refresh endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │  Conversation    │────▶│  TokenProvider   │
//! │  (channel/HTTP)  │     │  (trait)         │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │ RefreshingToken  │
//!                          │ Provider         │
//!                          └────────┬─────────┘
//!                                   │ HTTPS
//!                          ┌────────▼─────────┐
//!                          │  Auth server     │
//!                          │  /v1/auth/refresh│
//!                          └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use parley_auth::{StaticTokenProvider, TokenProvider};
//!
//! # async fn example() {
//! let provider = StaticTokenProvider::new("opaque-api-key");
//! // Opaque tokens carry no expiry and always count as fresh.
//! assert!(provider.ensure_fresh(Duration::from_secs(30)).await);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod jwt;
pub mod provider;

pub use client::{RefreshClient, RefreshRequest, TokenPair};
pub use error::{AuthError, Result};
pub use provider::{RefreshingTokenProvider, StaticTokenProvider, TokenProvider};

/// Configuration for the auth server.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL of the auth server (e.g., `https://auth.example.com`).
    pub base_url: String,
    /// HTTP request timeout, in seconds.
    pub request_timeout_seconds: u64,
}

impl AuthConfig {
    /// Get the token refresh endpoint URL.
    #[must_use]
    pub fn refresh_url(&self) -> String {
        format!("{}/v1/auth/refresh", self.base_url.trim_end_matches('/'))
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_seconds: 30,
        }
    }
}
