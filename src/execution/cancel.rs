//! Cooperative Cancellation
//!
//! A single token shared by the workflow, the engine and every in-flight
//! attempt. Setting it never interrupts a body directly; the engine observes
//! it at the top of the NORMAL loop, before each attempt, and while waiting
//! on an attempt.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cloneable handle used to cancel a running workflow from another task.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
