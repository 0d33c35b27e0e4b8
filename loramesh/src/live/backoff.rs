//! Reconnect delay schedule for the live channel.

use std::time::Duration;

/// Capped exponential backoff without jitter.
///
/// The delay for attempt `n` is `min(base_delay * growth^n, max_delay)`,
/// rounded to whole milliseconds. `attempt` counts failures since the last
/// successful open.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    growth: f64,
    attempt: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(5000), 1.5)
    }
}

impl ReconnectPolicy {
    /// Creates a policy starting at attempt 0.
    ///
    /// A `growth` below 1.0 (or NaN) is treated as 1.0 so the schedule never
    /// shrinks.
    ///
    /// # Examples
    ///
    /// ```
    /// use loramesh::live::backoff::ReconnectPolicy;
    /// use std::time::Duration;
    /// let mut policy = ReconnectPolicy::new(
    ///     Duration::from_millis(1000),
    ///     Duration::from_millis(5000),
    ///     1.5,
    /// );
    /// assert_eq!(policy.next_delay(), Duration::from_millis(1000));
    /// assert_eq!(policy.next_delay(), Duration::from_millis(1500));
    /// assert_eq!(policy.attempt(), 2);
    /// ```
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, growth: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            growth: if growth >= 1.0 { growth } else { 1.0 },
            attempt: 0,
        }
    }

    /// Delay for attempt `n`, independent of the current state.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        let exponent = i32::try_from(n).unwrap_or(i32::MAX);
        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = base_ms * self.growth.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        if !raw_ms.is_finite() || raw_ms >= max_ms {
            return self.max_delay;
        }
        Duration::from_millis(raw_ms.round() as u64)
    }

    /// Delay for the current attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to attempt 0, after a successful open.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failures since the last successful open.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}
