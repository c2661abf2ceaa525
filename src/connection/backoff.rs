use std::time::Duration;

use crate::config::RetrySettings;

/// Exponential backoff schedule with proportional jitter and a hard cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            multiplier,
            max,
            jitter,
        }
    }

    /// Delay before the retry following `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self
            .base
            .mul_f64(self.multiplier.powi(attempt.saturating_sub(1) as i32));

        let jittered = if self.jitter > 0.0 {
            delay.mul_f64(1.0 + fastrand::f64() * self.jitter)
        } else {
            delay
        };

        jittered.min(self.max)
    }
}

impl From<&RetrySettings> for Backoff {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            settings.multiplier,
            Duration::from_millis(settings.max_delay_ms),
            settings.jitter,
        )
    }
}
