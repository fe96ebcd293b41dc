use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Per-task poll iteration counter plus the cancellation signal it was created with.
#[derive(Debug)]
pub struct BatchPollContext {
    iteration: AtomicU64,
    token: CancellationToken,
}

impl BatchPollContext {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            iteration: AtomicU64::new(0),
            token,
        }
    }

    /// Moves the context to a new poll iteration.
    pub fn reset(&self, iteration: u64) {
        self.iteration.store(iteration, Ordering::Relaxed);
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Relaxed)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
