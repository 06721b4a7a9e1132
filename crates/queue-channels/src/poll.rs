//! # Reply Poll Policy
//!
//! Exponential backoff between correlation lookups while a requester waits
//! for its reply.
//!
//! Unlike a retry policy there is no attempt limit: waiting is bounded only
//! by the optional `timeout` or by cancellation.

use rand::Rng;
use std::time::Duration;

/// Backoff configuration for reply polling
///
/// # Examples
///
/// ```rust
/// use queue_channels::ReplyPollPolicy;
/// use std::time::Duration;
///
/// // Default policy: 10ms initial, 1s cap, 2.0x multiplier, wait forever
/// let policy = ReplyPollPolicy::default();
/// assert!(policy.timeout.is_none());
///
/// let bounded = ReplyPollPolicy::default().with_timeout(Duration::from_secs(30));
/// assert_eq!(bounded.timeout, Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyPollPolicy {
    /// Delay after the first unsuccessful lookup
    pub initial_delay: Duration,

    /// Maximum delay between lookups
    pub max_delay: Duration,

    /// Exponential backoff multiplier (typically 2.0)
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as percentage (default 25% = ±25%)
    pub jitter_percent: f64,

    /// Give up after this long; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for ReplyPollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_percent: 0.25,
            timeout: None,
        }
    }
}

impl ReplyPollPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// Poll with no delay between lookups
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 1.0).without_jitter()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0); NaN is ignored
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        if !percent.is_nan() {
            self.jitter_percent = percent.clamp(0.0, 1.0);
        }
        self
    }

    /// Delay before the lookup following unsuccessful attempt `attempt` (0-based)
    ///
    /// Uses exponential backoff formula: delay = initial * multiplier^attempt,
    /// capped at `max_delay`, then jittered. A result too large for a
    /// `Duration` falls back to `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let capped_delay_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay_secs = if self.use_jitter {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::try_from_secs_f64(final_delay_secs.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Applies random variation in range [delay * (1-jitter), delay * (1+jitter)]
    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if !jitter_range.is_finite() || jitter_range <= 0.0 {
            return delay_secs;
        }

        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        (delay_secs + jitter).max(0.0)
    }
}

#[cfg(test)]
#[path = "poll_tests.rs"]
mod tests;
