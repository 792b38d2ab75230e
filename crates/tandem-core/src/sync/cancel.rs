//! Session cancellation
//!
//! Every externally visible effect of a session (store writes, lifecycle
//! callbacks, status updates) runs through [`CancelGuard::run`]. Cancelling
//! takes the write side of the gate, so once [`CancelGuard::cancel`]
//! returns no effect is in flight and none will start.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Monotonic cancellation flag with an effect barrier
///
/// Effects must not call [`CancelGuard::cancel`] on the same guard.
#[derive(Debug, Clone, Default)]
pub struct CancelGuard {
    token: CancellationToken,
    gate: Arc<RwLock<()>>,
}

impl CancelGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the guard has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run an effect unless cancelled
    pub fn run<T>(&self, effect: impl FnOnce() -> T) -> Option<T> {
        let _open = self.gate.read();
        if self.token.is_cancelled() {
            return None;
        }
        Some(effect())
    }

    /// Cancel, waiting for in-flight effects to finish
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        let _closed = self.gate.write();
        self.token.cancel();
    }

    /// Resolves once cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Token for tasks that only need to stop, not gate effects
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
