//! Token providers consumed by the channel and HTTP collaborators.
//!
//! A provider hands out the current access token and, before a channel is
//! opened, is asked to make sure the token stays valid for a minimum window.
//! A failed refresh never blocks the caller; it reports `false` and the
//! backend decides whether the stale token is still acceptable.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::RefreshClient;
use crate::jwt;

/// Source of access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The current access token.
    fn token(&self) -> String;

    /// Make sure the token remains valid for at least `min_validity`.
    ///
    /// Returns `true` if the token is (now) fresh enough.
    async fn ensure_fresh(&self, min_validity: Duration) -> bool;
}

/// A fixed token, e.g. supplied on the command line.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wrap a fixed token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> String {
        self.token.clone()
    }

    async fn ensure_fresh(&self, min_validity: Duration) -> bool {
        jwt::is_fresh(&self.token, min_validity)
    }
}

struct Tokens {
    access: String,
    refresh: String,
}

/// A provider that refreshes the access token through the auth server when
/// it would expire within the requested window.
pub struct RefreshingTokenProvider {
    client: RefreshClient,
    tokens: Mutex<Tokens>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl RefreshingTokenProvider {
    /// Create a provider from an initial token pair.
    #[must_use]
    pub fn new(
        client: RefreshClient,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens: Mutex::new(Tokens {
                access: access_token.into(),
                refresh: refresh_token.into(),
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl TokenProvider for RefreshingTokenProvider {
    fn token(&self) -> String {
        self.tokens.lock().access.clone()
    }

    async fn ensure_fresh(&self, min_validity: Duration) -> bool {
        if jwt::is_fresh(&self.token(), min_validity) {
            return true;
        }

        // One refresh at a time; whoever waited re-checks the rotated token.
        let _guard = self.refresh_lock.lock().await;
        if jwt::is_fresh(&self.token(), min_validity) {
            return true;
        }

        let refresh_token = self.tokens.lock().refresh.clone();
        match self.client.refresh(&refresh_token).await {
            Ok(pair) => {
                let mut tokens = self.tokens.lock();
                tokens.access = pair.access_token;
                if let Some(rotated) = pair.refresh_token {
                    tokens.refresh = rotated;
                }
                tracing::debug!("Access token refreshed");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed");
                false
            }
        }
    }
}
