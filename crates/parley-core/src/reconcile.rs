//! Reconciliation of streamed fragments and authoritative batches.
//!
//! Both operations are pure: they borrow the current collection and return a
//! freshly ordered one. Within a key the most recently applied write wins
//! (arrival order, not timestamp), which is what lets a final batch replace
//! any streamed fragment with the same key.

use std::collections::HashMap;

use crate::ids::SessionId;
use crate::message::{sort_for_display, Message, MessageKey};

/// Insert or replace a single (typically streamed) message.
///
/// An entry with the same composite key is replaced in place; otherwise the
/// message is appended. The result is sorted into display order. Applying the
/// same message twice yields the same collection as applying it once.
#[must_use]
pub fn upsert_one(collection: &[Message], message: Message) -> Vec<Message> {
    let mut next = collection.to_vec();

    match next.iter().position(|existing| existing.same_key(&message)) {
        Some(idx) => {
            log_regression(&next[idx], &message);
            next[idx] = message;
        }
        None => next.push(message),
    }

    sort_for_display(&mut next);
    next
}

/// Merge an authoritative batch over the current collection.
///
/// Every message in `final_batch` overwrites the entry with the same key or is
/// inserted if absent, so no stale streamed fragment survives for a key the
/// batch covers, and messages the client never saw (e.g. the user's own turn)
/// appear in their ranked position.
#[must_use]
pub fn merge_authoritative(
    collection: &[Message],
    final_batch: impl IntoIterator<Item = Message>,
) -> Vec<Message> {
    let mut index: HashMap<MessageKey, usize> = HashMap::with_capacity(collection.len());
    let mut merged: Vec<Message> = Vec::with_capacity(collection.len());

    // Insertion order is kept so the stable sort below is deterministic for
    // entries that compare equal.
    for message in collection.iter().cloned().chain(final_batch) {
        let key = message.key();
        match index.get(&key) {
            Some(&idx) => merged[idx] = message,
            None => {
                index.insert(key, merged.len());
                merged.push(message);
            }
        }
    }

    sort_for_display(&mut merged);
    merged
}

/// Whether a message belongs to the session currently being viewed.
///
/// Nothing is in scope for a view without a session.
#[must_use]
pub fn in_scope(active: Option<&SessionId>, message: &Message) -> bool {
    active.is_some_and(|id| *id == message.session_id)
}

/// Log a streamed fragment whose text shrank relative to the one it replaces.
///
/// The newer fragment is still applied.
fn log_regression(previous: &Message, next: &Message) {
    let before = previous.text();
    let after = next.text();
    if after.len() < before.len() {
        tracing::debug!(
            session_id = %next.session_id,
            exchange_id = %next.exchange_id,
            rank = next.rank,
            before = before.len(),
            after = after.len(),
            "Streamed content shrank; applying latest fragment"
        );
    }
}
