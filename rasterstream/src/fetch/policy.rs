//! Backoff schedule for object store requests.
//!
//! Header probes, block ranges and whole-object reads all go through
//! [`RangeFetcher`](super::RangeFetcher), which consults one policy for every
//! request. Only transient failures are retried; see
//! [`FetchError::is_retryable`](super::FetchError::is_retryable).
//!
//! ```ignore
//! use rasterstream::fetch::RetryPolicy;
//!
//! // Up to four requests, sleeping 100ms, 200ms and 400ms in between
//! let policy = RetryPolicy::exponential(4);
//! assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Requests per object read, counting the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Sleep after the first transient failure.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Longest single sleep between requests.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Growth of the sleep per failed request.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How often, and how patiently, a failed request is reissued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Every request is issued exactly once.
    None,

    /// Constant sleep between requests.
    Fixed { max_attempts: u32, delay: Duration },

    /// Sleep grows by `multiplier` per failure, never beyond `max_delay`.
    ExponentialBackoff {
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Exponential backoff from 100ms, doubling, capped at 30s.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Requests issued before giving up. Never less than one.
    pub fn max_attempts(&self) -> u32 {
        let attempts = match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } | Self::ExponentialBackoff { max_attempts, .. } => {
                *max_attempts
            }
        };
        attempts.max(1)
    }

    /// Sleep after request number `attempt` (1-based) failed, or `None` when
    /// that was the last one allowed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts() {
            return None;
        }
        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = initial_delay.as_secs_f64() * multiplier.powi(exponent);
                let delay = Duration::try_from_secs_f64(secs).unwrap_or(*max_delay);
                Some(delay.min(*max_delay))
            }
        }
    }
}
