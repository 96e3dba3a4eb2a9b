//! Draft-to-session binding.
//!
//! A conversation starts as a draft and becomes durable once the backend
//! assigns it a session ID, either through an explicit creation request or on
//! a side path (an upload response, a final frame). [`SessionLifecycle`]
//! guarantees that concurrent callers share a single in-flight creation and
//! that a creation finishing after the user switched conversations is thrown
//! away instead of binding the wrong view.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use parley_core::SessionId;

use crate::error::{ControlError, Result};
use crate::lifecycle::{self, Phase};
use crate::service::SessionBackend;
use crate::types::SessionPreferences;

type PendingCreation = Shared<BoxFuture<'static, Result<SessionId>>>;

enum State {
    Draft,
    Creating(PendingCreation),
    Bound(SessionId),
}

impl State {
    const fn phase(&self) -> Phase {
        match self {
            Self::Draft => Phase::Draft,
            Self::Creating(_) => Phase::Creating,
            Self::Bound(_) => Phase::Bound,
        }
    }
}

struct Inner {
    state: State,
    /// Bumped on every conversation switch.
    epoch: u64,
    preferences: SessionPreferences,
}

/// Result of offering a backend-assigned session ID to the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The draft is now bound to the offered ID.
    Bound,
    /// The conversation was already bound to this ID.
    AlreadyBound,
    /// A creation is in flight and stays authoritative.
    Ignored,
}

/// Owns the draft/creating/bound state of one conversation view.
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct SessionLifecycle {
    backend: Arc<dyn SessionBackend>,
    inner: Arc<Mutex<Inner>>,
}

impl SessionLifecycle {
    /// Start in the draft state.
    #[must_use]
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self::with_state(backend, None)
    }

    /// Start bound to an existing session.
    #[must_use]
    pub fn bound(backend: Arc<dyn SessionBackend>, session_id: SessionId) -> Self {
        Self::with_state(backend, Some(session_id))
    }

    fn with_state(backend: Arc<dyn SessionBackend>, session_id: Option<SessionId>) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(Inner {
                state: session_id.map_or(State::Draft, State::Bound),
                epoch: 0,
                preferences: SessionPreferences::default(),
            })),
        }
    }

    /// The bound session ID, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        match &self.inner.lock().state {
            State::Bound(id) => Some(id.clone()),
            _ => None,
        }
    }

    /// The current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.lock().state.phase()
    }

    /// The current conversation epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// A snapshot of the conversation's retrieval preferences.
    #[must_use]
    pub fn preferences(&self) -> SessionPreferences {
        self.inner.lock().preferences.clone()
    }

    /// Return the bound session ID, creating a session if necessary.
    ///
    /// Concurrent callers while a creation is in flight all await the same
    /// creation and receive the same ID. The creation runs on its own task,
    /// so dropping a caller never strands the lifecycle in `Creating`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::CreateFailed` if the backend fails (the
    /// lifecycle reverts to draft) or `ControlError::Superseded` if the
    /// conversation was switched before the creation completed.
    pub async fn ensure_session_id(&self, agent_name: &str) -> Result<SessionId> {
        let pending = {
            let mut inner = self.inner.lock();
            match &inner.state {
                State::Bound(id) => return Ok(id.clone()),
                State::Creating(pending) => pending.clone(),
                State::Draft => {
                    lifecycle::validate_transition(Phase::Draft, Phase::Creating)?;
                    let epoch = inner.epoch;
                    let this = self.clone();
                    let agent_name = agent_name.to_string();
                    let handle =
                        tokio::spawn(async move { this.run_creation(epoch, &agent_name).await });
                    let pending = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(ControlError::Internal(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    inner.state = State::Creating(pending.clone());
                    tracing::debug!(epoch, "Session creation started");
                    pending
                }
            }
        };
        pending.await
    }

    async fn run_creation(&self, epoch: u64, agent_name: &str) -> Result<SessionId> {
        let result = self.backend.create_session(agent_name).await;

        let seed = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                tracing::debug!(
                    epoch,
                    current = inner.epoch,
                    "Discarding session creation from a previous conversation"
                );
                return Err(ControlError::Superseded);
            }
            match result {
                Ok(info) => {
                    lifecycle::validate_transition(inner.state.phase(), Phase::Bound)?;
                    inner.state = State::Bound(info.id.clone());
                    tracing::info!(session_id = %info.id, agent = agent_name, "Session created");
                    Self::seed_snapshot(&inner, info.id)
                }
                Err(e) => {
                    inner.state = State::Draft;
                    tracing::warn!(error = %e, agent = agent_name, "Session creation failed");
                    return Err(e);
                }
            }
        };

        let id = seed.0.clone();
        self.seed_preferences(seed).await;
        Ok(id)
    }

    /// Bind a session ID the backend assigned on a side path.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AlreadyBound` if the conversation is bound to a
    /// different session.
    pub async fn absorb(&self, session_id: SessionId) -> Result<BindOutcome> {
        let seed = {
            let mut inner = self.inner.lock();
            match &inner.state {
                State::Bound(bound) if *bound == session_id => {
                    return Ok(BindOutcome::AlreadyBound);
                }
                State::Bound(bound) => {
                    return Err(ControlError::AlreadyBound {
                        bound: bound.clone(),
                        offered: session_id,
                    });
                }
                State::Creating(_) => {
                    tracing::debug!(
                        session_id = %session_id,
                        "Ignoring side-path session while creation is in flight"
                    );
                    return Ok(BindOutcome::Ignored);
                }
                State::Draft => {
                    inner.state = State::Bound(session_id.clone());
                    tracing::info!(session_id = %session_id, "Draft bound to session");
                    Self::seed_snapshot(&inner, session_id)
                }
            }
        };

        self.seed_preferences(seed).await;
        Ok(BindOutcome::Bound)
    }

    /// Switch the view to another session, or to a fresh draft.
    ///
    /// Any in-flight creation is orphaned and its result discarded. The
    /// preferences reset to defaults so draft choices never leak into another
    /// session. Returns the new epoch.
    pub fn switch_to(&self, session_id: Option<SessionId>) -> u64 {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        inner.preferences = SessionPreferences::default();
        tracing::debug!(
            epoch = inner.epoch,
            session_id = ?session_id.as_ref().map(SessionId::as_str),
            "Conversation switched"
        );
        inner.state = session_id.map_or(State::Draft, State::Bound);
        inner.epoch
    }

    /// Modify the retrieval preferences.
    ///
    /// A bound session persists the change immediately; otherwise it is seeded
    /// when the draft becomes bound.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Backend` if saving to a bound session fails. The
    /// local change is kept.
    pub async fn update_preferences<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut SessionPreferences),
    {
        let target = {
            let mut inner = self.inner.lock();
            update(&mut inner.preferences);
            match &inner.state {
                State::Bound(id) => Some((id.clone(), inner.preferences.clone())),
                _ => None,
            }
        };

        if let Some((id, prefs)) = target {
            self.backend.save_preferences(&id, &prefs).await?;
            tracing::debug!(session_id = %id, "Preferences saved");
        }
        Ok(())
    }

    fn seed_snapshot(inner: &Inner, id: SessionId) -> (SessionId, Option<SessionPreferences>) {
        let prefs = (!inner.preferences.is_default()).then(|| inner.preferences.clone());
        (id, prefs)
    }

    async fn seed_preferences(&self, (id, prefs): (SessionId, Option<SessionPreferences>)) {
        let Some(prefs) = prefs else {
            return;
        };
        if let Err(e) = self.backend.save_preferences(&id, &prefs).await {
            tracing::warn!(session_id = %id, error = %e, "Failed to seed session preferences");
        }
    }
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SessionLifecycle")
            .field("phase", &inner.state.phase())
            .field("epoch", &inner.epoch)
            .finish_non_exhaustive()
    }
}
