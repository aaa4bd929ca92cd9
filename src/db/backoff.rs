//! Capped exponential backoff between retry attempts.

use std::time::Duration;

/// Default delay before the second attempt.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 80;

/// Default ceiling for any single delay.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 500;

/// `delay(n) = min(cap, base * 2^(n-1))`.
///
/// Deterministic: no jitter is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Create a policy; `cap` is raised to `base` if it is smaller.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
        )
    }
}
