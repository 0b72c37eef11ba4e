//! Reconnection policy applied after the link closes.

use rand::Rng;
use std::time::Duration;

/// Default delay between a close and the next connection attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Decides whether, and after how long, to reconnect.
///
/// The default is a fixed 3 second delay with unlimited attempts. Growth,
/// jitter and an attempt cap are opt-in.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt
    pub delay: Duration,
    /// Factor applied to the delay after each failed attempt (1.0 = fixed)
    pub multiplier: f64,
    /// Upper bound for the grown delay
    pub max_delay: Duration,
    /// Random spread as a fraction of the delay, in `[0.0, 1.0]`
    pub jitter: f64,
    /// Give up after this many consecutive attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed-delay policy with unlimited attempts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: delay,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    ///
    /// Returns `None` once the attempt cap is exceeded.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }

        let base = self.base_delay(attempt);
        Some(self.apply_jitter(base))
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return self.delay;
        }

        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let grown = self.delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = grown.min(self.max_delay.as_secs_f64().max(self.delay.as_secs_f64()));
        Duration::from_secs_f64(capped)
    }

    fn apply_jitter(&self, base: Duration) -> Duration {
        if !self.jitter.is_finite() {
            return base;
        }
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }

        let spread = base.as_secs_f64() * jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }
}
