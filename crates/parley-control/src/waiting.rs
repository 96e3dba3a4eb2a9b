//! Debounced "assistant is working" indicator.
//!
//! Once shown, the indicator stays visible for a minimum duration so a fast
//! reply does not make it flicker. Every [`WaitingIndicator::begin`] bumps a
//! sequence number; a deferred clear only fires if no newer wait started in
//! the meantime.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

/// Default minimum time the indicator stays visible.
pub const DEFAULT_MIN_VISIBLE: Duration = Duration::from_millis(200);

#[derive(Debug)]
struct WaitState {
    seq: u64,
    started: Option<Instant>,
}

/// Debounced waiting flag published through a `watch` channel.
#[derive(Debug, Clone)]
pub struct WaitingIndicator {
    state: Arc<Mutex<WaitState>>,
    tx: Arc<watch::Sender<bool>>,
    min_visible: Duration,
}

impl Default for WaitingIndicator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_VISIBLE)
    }
}

impl WaitingIndicator {
    /// Create an indicator with the given minimum visible duration.
    #[must_use]
    pub fn new(min_visible: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(WaitState {
                seq: 0,
                started: None,
            })),
            tx: Arc::new(tx),
            min_visible,
        }
    }

    /// Show the indicator. Returns the new wait sequence number.
    pub fn begin(&self) -> u64 {
        let mut state = self.state.lock();
        state.seq += 1;
        state.started = Some(Instant::now());
        self.tx.send_replace(true);
        state.seq
    }

    /// Hide the indicator.
    ///
    /// With `immediate`, clears now. Otherwise waits out the remainder of the
    /// minimum visible duration, and clears only if no newer wait began.
    pub fn end(&self, immediate: bool) {
        let (seq, remaining) = {
            let state = self.state.lock();
            let elapsed = state.started.map_or(self.min_visible, |s| s.elapsed());
            (state.seq, self.min_visible.saturating_sub(elapsed))
        };

        if immediate || remaining.is_zero() {
            self.clear_if_current(seq);
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            this.clear_if_current(seq);
        });
    }

    fn clear_if_current(&self, seq: u64) {
        let mut state = self.state.lock();
        if state.seq != seq {
            tracing::trace!(seq, current = state.seq, "Skipping stale waiting clear");
            return;
        }
        state.started = None;
        self.tx.send_replace(false);
    }

    /// Whether the indicator is currently shown.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to indicator changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
