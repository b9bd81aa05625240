use std::time::Duration;

use hubvault_core::ClientConfig;

/// Exponential reconnect schedule: attempt `n` waits `base * multiplier^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            base_delay: config.reconnect_base_delay(),
            multiplier: config.reconnect_multiplier,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before the given 1-based attempt, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = self.multiplier.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor))
    }
}
