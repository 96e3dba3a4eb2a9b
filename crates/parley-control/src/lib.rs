//! Conversation session lifecycle for parley.
//!
//! This crate owns the part of a conversation that outlives a single channel:
//! whether it is still a draft, whether a backend session is being created,
//! and which session it is bound to. It also provides the debounced waiting
//! indicator the conversation view shows while the agent works.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Conversation view                        │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//! ┌───────────────────────────────┐   ┌─────────────────────────┐
//! │       SessionLifecycle        │   │    WaitingIndicator     │
//! │  draft → creating → bound(id) │   │  begin / end(immediate) │
//! └───────────────────────────────┘   └─────────────────────────┘
//!                 │
//!                 ▼
//!        ┌─────────────────┐
//!        │ SessionBackend  │
//!        │ (gateway HTTP)  │
//!        └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley_control::{SessionBackend, SessionLifecycle};
//!
//! # async fn example(backend: Arc<dyn SessionBackend>) -> parley_control::Result<()> {
//! let lifecycle = SessionLifecycle::new(backend);
//!
//! // Concurrent callers share one creation request.
//! let session_id = lifecycle.ensure_session_id("helper").await?;
//! println!("bound to {session_id}");
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! - `Draft` → `Creating` (first send) or `Bound` (side-path id)
//! - `Creating` → `Bound` (backend id) or `Draft` (failure)
//! - Any state → `Draft` or `Bound` on an explicit conversation switch

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod lifecycle;
pub mod service;
pub mod session;
pub mod types;
pub mod waiting;

pub use error::{ControlError, Result};
pub use lifecycle::Phase;
pub use service::SessionBackend;
pub use session::{BindOutcome, SessionLifecycle};
pub use types::{SearchPolicy, SessionInfo, SessionPreferences};
pub use waiting::{WaitingIndicator, DEFAULT_MIN_VISIBLE};
