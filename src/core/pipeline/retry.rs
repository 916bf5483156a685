use std::time::Duration;

use crate::core::provider::Provider;

/// Exponential backoff between attempts on one provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: u32,
    pub max: Duration,
    /// Fraction of the nominal delay added or removed at random.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            multiplier: 2,
            max: Duration::from_secs(8),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based), without jitter.
    pub fn nominal(&self, retry: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let factor = (self.multiplier.max(1) as u64).saturating_pow(retry);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay before retry number `retry`, with jitter applied to the capped
    /// nominal value.
    pub fn delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal(retry).as_millis() as f64;
        let spread = nominal * self.jitter.clamp(0.0, 1.0);
        let offset = if spread > 0.0 {
            rand::random::<f64>() * 2.0 * spread - spread
        } else {
            0.0
        };
        Duration::from_millis((nominal + offset).max(0.0).round() as u64)
    }

    /// Upper bound of any single delay.
    pub fn max_delay(&self) -> Duration {
        let max_ms = self.max.as_millis() as f64;
        Duration::from_millis((max_ms * (1.0 + self.jitter.clamp(0.0, 1.0))).ceil() as u64)
    }

    /// Worst-case wall clock for one stage: for every provider, each attempt
    /// may run to its timeout and be followed by the longest backoff.
    pub fn stage_ceiling(&self, providers: &[Provider]) -> Duration {
        let backoff = self.max_delay();
        providers
            .iter()
            .map(|p| {
                let per_attempt = Duration::from_millis(p.config.timeout_ms) + backoff;
                per_attempt.saturating_mul(p.config.max_retries.max(1))
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}
