//! Core types for parley.
//!
//! This crate holds the pieces of the conversation engine that have no I/O:
//!
//! - **Identifiers**: backend-assigned session and exchange IDs, client exchange IDs
//! - **Message model**: roles, channels, typed parts, composite keys, display order
//! - **Reconciliation**: pure upsert/merge of streamed and authoritative messages
//!
//! # Example
//!
//! ```
//! use parley_core::{merge_authoritative, upsert_one, Channel, ExchangeId, Message, Role, SessionId};
//!
//! let session = SessionId::new("s1").unwrap();
//! let exchange = ExchangeId::new("e1").unwrap();
//! let partial = Message::new(session.clone(), exchange.clone(), 0, Role::Assistant, Channel::Final)
//!     .with_text("Hel");
//! let done = partial.clone().with_text("lo");
//!
//! let streamed = upsert_one(&[], partial);
//! let merged = merge_authoritative(&streamed, vec![done]);
//! assert_eq!(merged.len(), 1);
//! assert_eq!(merged[0].text(), "Hello");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;
pub mod message;
pub mod reconcile;

pub use ids::{ClientExchangeId, ExchangeId, IdError, SessionId};
pub use message::{display_order, sort_for_display, Channel, Message, MessageKey, Part, Role};
pub use reconcile::{in_scope, merge_authoritative, upsert_one};
