//! # Reconnect Backoff
//!
//! Delay arithmetic for the reconnect loop. The reference behavior is an
//! uncapped `base * 1.5^attempt`, bounded only by the attempt ceiling. A cap
//! can be set explicitly with [`BackoffPolicy::max_delay`]; without one, large
//! attempt ceilings produce very long waits.

use std::time::Duration;

/// Growth factor applied per attempt.
pub const GROWTH_FACTOR: f64 = 1.5;

/// `base * GROWTH_FACTOR^attempt`, uncapped.
pub fn delay(base: Duration, attempt: u32) -> Duration {
    scaled(base, GROWTH_FACTOR, attempt)
}

/// `true` while another reconnect attempt is allowed.
pub fn should_retry(attempt: u32, max_attempts: u32) -> bool {
    attempt < max_attempts
}

fn scaled(base: Duration, factor: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = base.as_secs_f64() * factor.powi(exponent);
    // Overflowing or non-finite results saturate instead of panicking.
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// # Backoff Policy
///
/// Bounds used by the connection state machine when scheduling a reconnect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Optional ceiling for a single delay.
    pub max_delay: Option<Duration>,
}

impl BackoffPolicy {
    /// Reference policy: growth 1.5, no cap.
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            factor: GROWTH_FACTOR,
            max_delay: None,
        }
    }

    /// Delay for the given zero-based attempt, with the cap applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = if self.factor.is_finite() && self.factor >= 1.0 {
            self.factor
        } else {
            1.0
        };
        let raw = scaled(self.base, factor, attempt);
        match self.max_delay {
            Some(cap) => raw.min(cap),
            None => raw,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(3000))
    }
}
