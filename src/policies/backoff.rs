//! # Backoff policy for automatic restart delays.
//!
//! [`BackoffPolicy`] controls how the delay before a restart attempt grows
//! with consecutive failures. The delay for failure streak `n` is
//! `base × factor^n`, clamped to `cap`. The streak is maintained by the
//! controller and resets to zero once a restarted process survives past the
//! configured minimum uptime, so an old failure streak cannot permanently
//! inflate delays after real recovery.

use std::time::Duration;

/// Restart backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart attempt.
    pub base: Duration,
    /// Upper bound on any computed delay.
    pub cap: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// Returns a policy with `base = 1s`, `cap = 60s`, `factor = 2.0`.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given consecutive-failure streak
    /// (0-indexed: the first restart after a healthy run uses `base`).
    ///
    /// The computation is overflow-safe: a non-finite or out-of-range
    /// intermediate value clamps to `cap`.
    pub fn delay_for(&self, streak: u32) -> Duration {
        let cap_secs = self.cap.as_secs_f64();
        let exponent = streak.min(i32::MAX as u32) as i32;
        let raw = self.base.as_secs_f64() * self.factor.powi(exponent);

        if !raw.is_finite() || raw < 0.0 || raw > cap_secs {
            self.cap
        } else {
            Duration::from_secs_f64(raw)
        }
    }
}
