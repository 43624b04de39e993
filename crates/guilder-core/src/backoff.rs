//! Retry delay schedules.
//!
//! [`Backoff`] is the capped multiplicative schedule used by the gateway
//! reconnect loop. [`ExponentialBackoff`] is the randomised schedule used by
//! background task loops; it forgets its progress when failures stop for long
//! enough.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// A capped multiplicative delay schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    jitter: bool,
}

impl Backoff {
    /// Creates a schedule starting at `initial`, multiplied by `multiplier`
    /// after each delay and never exceeding `max`.
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            current: initial.min(max),
            jitter: false,
        }
    }

    /// Scales every returned delay by a random factor in `[0.5, 1.0]`.
    ///
    /// The schedule itself still advances from the unscaled delay.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// The unscaled delay the next call to [`next_delay`](Self::next_delay) returns.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the current delay and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        if self.jitter {
            delay.mul_f64(rand::rng().random_range(0.5..=1.0))
        } else {
            delay
        }
    }

    /// Returns to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

/// Randomised exponential backoff.
///
/// Each call to [`delay`](Self::delay) returns a random duration in
/// `[0, base * 2^exp)` where `exp` grows by one per call up to `max_exp`.
/// If more than `base * 2^11` elapsed since the previous call, `exp` restarts.
#[derive(Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    exp: u32,
    max_exp: u32,
    reset_after: Duration,
    last_invocation: Instant,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ExponentialBackoff {
    /// Creates a backoff with the given base delay.
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            exp: 0,
            max_exp: 10,
            reset_after: base * (1 << 11),
            last_invocation: Instant::now(),
        }
    }

    /// Upper bound of the next delay, before randomisation.
    pub fn ceiling(&self) -> Duration {
        self.base * (1 << (self.exp + 1).min(self.max_exp))
    }

    /// Computes the next delay.
    pub fn delay(&mut self) -> Duration {
        let now = Instant::now();
        if now.duration_since(self.last_invocation) > self.reset_after {
            self.exp = 0;
        }
        self.last_invocation = now;

        self.exp = (self.exp + 1).min(self.max_exp);
        let ceiling = self.base * (1 << self.exp);
        ceiling.mul_f64(rand::rng().random_range(0.0..1.0))
    }
}
