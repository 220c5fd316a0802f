//! Process-wide admission control for calls that bypass the job queue.
//!
//! A blunt counter: calls are admitted until `threshold` have been made in
//! the current window, then every caller is held for `cooldown` before the
//! count starts over. An idle gap longer than `window` also resets the count.
//! It does not coordinate with the coalescer's own rate-limit backoff.

use crate::config::AdmissionConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Default)]
struct Window {
    count: u32,
    last_call: Option<Instant>,
}

#[derive(Debug)]
pub struct RateCounter {
    config: AdmissionConfig,
    window: Mutex<Window>,
}

impl RateCounter {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window::default()),
        }
    }

    /// Wait until the caller may proceed with an upstream call.
    ///
    /// The lock is held across the cool-down, so callers queued behind a
    /// suspended one are suspended too.
    pub async fn admit(&self) {
        let mut window = self.window.lock().await;

        if window
            .last_call
            .is_some_and(|last| last.elapsed() > self.config.window)
        {
            window.count = 0;
        }

        if window.count >= self.config.threshold {
            info!(
                admitted = window.count,
                cooldown_secs = self.config.cooldown.as_secs(),
                "admission threshold reached, cooling down"
            );
            tokio::time::sleep(self.config.cooldown).await;
            window.count = 0;
        }

        window.count += 1;
        window.last_call = Some(Instant::now());
    }

    /// Calls counted in the current window.
    pub async fn count(&self) -> u32 {
        self.window.lock().await.count
    }
}
