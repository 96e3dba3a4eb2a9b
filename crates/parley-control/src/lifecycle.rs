//! Conversation lifecycle state machine.
//!
//! This module defines the phases a conversation moves through on its way to
//! a durable backend session and validates the transitions the session binder
//! performs on its own. Explicit conversation switches bypass validation: the
//! user may always leave for a draft or another session.
//!
//! # State Machine
//!
//! ```text
//!     ┌─────────┐   ensure_session_id    ┌────────────┐
//!     │  Draft  │───────────────────────▶│  Creating  │
//!     └────┬────┘◀───────────────────────└─────┬──────┘
//!          │           (failure)               │ (backend id)
//!          │ absorb(id)                        ▼
//!          │                             ┌────────────┐
//!          └────────────────────────────▶│ Bound(id)  │
//!                                        └────────────┘
//! ```

use crate::error::{ControlError, Result};

/// Coarse phase of a conversation, without the data each phase carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No backend session yet.
    Draft,
    /// A creation request is in flight.
    Creating,
    /// A backend session ID has been assigned.
    Bound,
}

/// Validates a transition and returns the target phase if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_transition(from: Phase, to: Phase) -> Result<Phase> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState { from, to })
    }
}

/// Check if a transition is valid outside of an explicit conversation switch.
#[must_use]
pub const fn is_valid_transition(from: Phase, to: Phase) -> bool {
    use Phase::{Bound, Creating, Draft};

    matches!(
        (from, to),
        // Draft starts a creation or absorbs an id assigned on a side path
        (Draft, Creating | Bound)
            // Creation either binds or fails back to draft
            | (Creating, Bound | Draft)
    )
}

/// Returns true if the conversation can be sent to without creating a session.
#[must_use]
pub const fn has_session(phase: Phase) -> bool {
    matches!(phase, Phase::Bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use Phase::*;

        assert!(is_valid_transition(Draft, Creating));
        assert!(is_valid_transition(Draft, Bound));
        assert!(is_valid_transition(Creating, Bound));
        assert!(is_valid_transition(Creating, Draft));
    }

    #[test]
    fn invalid_transitions() {
        use Phase::*;

        // A bound id is immutable without a switch
        assert!(!is_valid_transition(Bound, Draft));
        assert!(!is_valid_transition(Bound, Creating));
        assert!(!is_valid_transition(Bound, Bound));
        // Only one creation at a time
        assert!(!is_valid_transition(Creating, Creating));
        assert!(!is_valid_transition(Draft, Draft));
    }

    #[test]
    fn validate_returns_target() {
        assert_eq!(
            validate_transition(Phase::Creating, Phase::Bound).unwrap(),
            Phase::Bound
        );
        assert!(matches!(
            validate_transition(Phase::Bound, Phase::Creating),
            Err(ControlError::InvalidState { .. })
        ));
    }

    #[test]
    fn only_bound_has_session() {
        assert!(has_session(Phase::Bound));
        assert!(!has_session(Phase::Creating));
        assert!(!has_session(Phase::Draft));
    }
}
