use std::time::Duration;

use rand::Rng;

use crate::core::config::Settings;

/// Pacing and attempt budgets shared by every job of an orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub jitter: bool,
    pub max_dispatch_attempts: u32,
    pub max_poll_attempts: u32,
    pub max_fetch_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            jitter: true,
            max_dispatch_attempts: 3,
            max_poll_attempts: 120,
            max_fetch_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let grading = settings.grading();
        Self {
            base_interval: grading.poll_interval(),
            max_interval: grading.max_poll_interval(),
            jitter: grading.backoff_jitter,
            max_dispatch_attempts: grading.max_dispatch_attempts,
            max_poll_attempts: grading.max_poll_attempts,
            max_fetch_attempts: grading.max_fetch_attempts,
        }
    }

    /// Upper bound of the wait before retry number `attempt` (0-based):
    /// the base interval doubled per attempt, capped at `max_interval`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.min(16);
        self.base_interval.saturating_mul(factor).min(self.max_interval)
    }

    /// Wait before retry number `attempt`. With jitter the delay is drawn
    /// from the upper half of the ceiling so pacing never collapses to zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let half = ceiling / 2;
        let spread: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        half + half.mul_f64(spread)
    }
}
