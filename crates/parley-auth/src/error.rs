//! Authentication error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while obtaining or inspecting access tokens.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is not a structurally valid JWT.
    #[error("invalid token format: {0}")]
    InvalidToken(String),

    /// A required claim is missing from the token.
    #[error("missing required claim: {0}")]
    MissingClaim(String),

    /// The refresh endpoint rejected the refresh token.
    #[error("refresh rejected ({status}): {message}")]
    RefreshRejected {
        /// HTTP status returned by the auth server.
        status: u16,
        /// Error message or code from the response body.
        message: String,
    },

    /// Too many refresh attempts, rate limited.
    #[error("rate limited")]
    RateLimited,

    /// The refresh request could not be sent or its response not read.
    #[error("request failed: {0}")]
    Request(String),
}

impl AuthError {
    /// Returns `true` if repeating the same request later might succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Request(_))
    }
}
