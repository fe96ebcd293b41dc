use engine_config::settings::RestartsConfig;
use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Bounded restart budget for one node of the execution tree.
///
/// The attempt counter starts over once `periodic_delay` has elapsed since
/// the first attempt of the current window.
#[derive(Debug)]
pub struct RestartContext {
    attempts: u32,
    retry_wait: Duration,
    periodic_delay: Duration,
    window: Mutex<RestartWindow>,
}

#[derive(Debug)]
struct RestartWindow {
    used: u32,
    started: Option<Instant>,
}

impl RestartContext {
    pub fn new(config: &RestartsConfig) -> Self {
        Self {
            attempts: config.attempts,
            retry_wait: config.retry_wait(),
            periodic_delay: config.periodic_delay(),
            window: Mutex::new(RestartWindow {
                used: 0,
                started: None,
            }),
        }
    }

    /// Consumes one attempt and reports whether it was within budget.
    pub fn retry(&self) -> bool {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        match window.started {
            Some(started) if now.duration_since(started) < self.periodic_delay => {}
            _ => {
                window.started = Some(now);
                window.used = 0;
            }
        }

        if window.used < self.attempts {
            window.used += 1;
            true
        } else {
            false
        }
    }

    pub fn retry_wait(&self) -> Duration {
        self.retry_wait
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn attempts_used(&self) -> u32 {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .used
    }

    pub fn reset(&self) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.used = 0;
        window.started = None;
    }
}
