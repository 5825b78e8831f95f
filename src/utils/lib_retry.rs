use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

/// Something that can wait.  Tests swap in a recorder.
pub trait Pause {
    fn pause(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How many times to retry and how long to wait in between.
///
/// The wait before retry `k` (`k >= 1`) is
/// `base_delay * growth_factor^(k-1) + U(0, jitter)`.
/// A `growth_factor` of 1 gives a constant delay.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub growth_factor: f64,
    pub jitter: Duration,
    /// Cap on the grown delay, jitter not included.
    pub max_delay: Duration,
    pub retryable: fn(StatusCode) -> bool,
}

/// Rate limited or temporarily unavailable.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            growth_factor: 2.0,
            jitter: Duration::from_secs(2),
            max_delay: Duration::from_secs(3600),
            retryable: is_transient_status,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, exponential: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay,
            growth_factor: if exponential { 2.0 } else { 1.0 },
            ..RetryPolicy::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn is_retryable(&self, status: StatusCode) -> bool {
        (self.retryable)(status)
    }

    /// Deterministic part of the wait before retry `attempt`.  Zero for the
    /// first attempt, never more than `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.growth_factor.powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(d) => d.min(self.max_delay),
            Err(_) => self.max_delay,
        }
    }

    /// Wait before retry `attempt`, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.backoff(attempt).saturating_add(self.jitter())
    }

    /// Wait between two consecutive requests, no growth.
    pub fn pacing_delay(&self) -> Duration {
        self.base_delay.saturating_add(self.jitter())
    }

    fn jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..self.jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}
