//! Exponential backoff with jitter for network targets.
//!
//! Time and randomness are injected through [`Sleeper`] and [`Jitter`] so
//! the schedule can be checked without waiting.

use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

/// Fraction of the backoff used as jitter in each direction.
const JITTER_FACTOR: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub retry_status_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered wait after the given 1-indexed attempt:
    /// `min(initial_delay * 2^(attempt-1), max_delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff_ms = self.initial_delay.as_millis() as f64 * 2f64.powi(exponent);
        let capped_ms = backoff_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_secs_f64(capped_ms / 1000.0)
    }

    /// Backoff shifted by up to ±25%. `jitter` is a sample in `[-1, 1]`.
    pub fn delay(&self, attempt: u32, jitter: f64) -> Duration {
        let backoff_ms = self.backoff(attempt).as_secs_f64() * 1000.0;
        let jitter = jitter.clamp(-1.0, 1.0);
        let delay_ms = backoff_ms + backoff_ms * JITTER_FACTOR * jitter;
        Duration::from_secs_f64(delay_ms.max(0.0) / 1000.0)
    }

    pub fn should_retry(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status)
    }
}

/// Source of jitter samples in `[-1, 1]`.
pub trait Jitter: Send + Sync {
    fn sample(&self) -> f64;
}

/// Uniformly distributed jitter from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(-1.0..=1.0)
    }
}

/// Always returns the same sample.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl Jitter for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
