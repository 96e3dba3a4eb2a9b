//! Error types for conversation session management.
//!
//! `ControlError` is `Clone` because it is the output of the shared
//! session-creation future, which every concurrent caller receives a copy of.

use parley_core::SessionId;
use thiserror::Error;

use crate::lifecycle::Phase;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in session lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    /// The backend failed to create a session.
    #[error("session creation failed: {0}")]
    CreateFailed(String),

    /// A backend call other than creation failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// The conversation was switched while the creation was in flight.
    #[error("session creation superseded by a conversation switch")]
    Superseded,

    /// A different session ID was offered for an already bound conversation.
    #[error("conversation is bound to session {bound}, refusing {offered}")]
    AlreadyBound {
        /// The authoritative session ID.
        bound: SessionId,
        /// The rejected session ID.
        offered: SessionId,
    },

    /// The requested state transition is not valid.
    #[error("invalid conversation transition: cannot transition from {from:?} to {to:?}")]
    InvalidState {
        /// The current phase.
        from: Phase,
        /// The requested target phase.
        to: Phase,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::CreateFailed(_) | Self::Backend(_) | Self::Internal(_)
        )
    }
}
