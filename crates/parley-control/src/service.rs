//! Backend contract for durable conversation sessions.

use async_trait::async_trait;
use parley_core::SessionId;

use crate::error::Result;
use crate::types::{SessionInfo, SessionPreferences};

/// Operations the session lifecycle needs from the backend.
///
/// Implemented by the gateway HTTP client; tests use in-memory fakes.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Create a new session for an agent.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::CreateFailed` if the backend refuses or cannot
    /// be reached.
    async fn create_session(&self, agent_name: &str) -> Result<SessionInfo>;

    /// Persist retrieval preferences for a session.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Backend` if the preferences could not be saved.
    async fn save_preferences(
        &self,
        session_id: &SessionId,
        preferences: &SessionPreferences,
    ) -> Result<()>;
}
