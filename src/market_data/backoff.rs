use rand::Rng;
use std::time::Duration;

/// Reconnect delay schedule: `min(max_delay, base * 2^attempt)` plus or
/// minus a random jitter fraction.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay: max_delay.max(base),
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Delay before reconnect number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.max_delay);

        let spread = capped.as_secs_f64() * self.jitter_factor;
        if spread <= 0.0 {
            return capped;
        }

        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }
}
