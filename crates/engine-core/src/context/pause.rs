use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Pause flag of a single node.
#[derive(Debug, Default)]
pub struct PauseGate {
    paused: AtomicBool,
}

impl PauseGate {
    pub fn new(paused: bool) -> Self {
        Self {
            paused: AtomicBool::new(paused),
        }
    }

    /// Returns true when the gate changed state.
    pub fn pause(&self) -> bool {
        !self.paused.swap(true, Ordering::SeqCst)
    }

    /// Returns true when the gate changed state.
    pub fn resume(&self) -> bool {
        self.paused.swap(false, Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Broadcast wake-up for everything blocked on a pause gate.
#[derive(Debug, Default)]
pub struct ResumeSignal {
    notify: Notify,
}

impl ResumeSignal {
    pub fn notify(&self) {
        self.notify.notify_waiters();
    }

    /// Blocks while `paused()` holds. Returns early on cancellation.
    pub async fn wait_while<F>(&self, paused: F, cancel: &CancellationToken)
    where
        F: Fn() -> bool,
    {
        loop {
            let resumed = self.notify.notified();
            tokio::pin!(resumed);
            // Register before checking the flag so a resume in between is not lost.
            resumed.as_mut().enable();

            if !paused() || cancel.is_cancelled() {
                return;
            }

            tokio::select! {
                _ = resumed => {}
                _ = cancel.cancelled() => return,
            }
        }
    }
}
