//! Cooperative cancellation signal.

use std::sync::Arc;
use tokio::sync::watch;

/// Clonable cancellation handle shared between a plan's coordinating task
/// and its in-flight atom tasks. Cancellation is cooperative: every
/// suspension point in the executor observes the signal and unwinds
/// instead of being force-killed.
#[derive(Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Cancellation {
    /// Create a fresh, uncancelled signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trip the signal. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether the signal has been tripped.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal trips. Returns immediately when already
    /// cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            // The sender lives in self, so changed() cannot error.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
