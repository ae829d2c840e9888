//! Retry with backoff for service calls
//!
//! [`with_delay`] wraps an async operation and retries it according to a
//! [`RetryPolicy`]: up to `nb_times` attempts in total, sleeping between
//! attempts, and returning the last error once the budget is spent.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::CoreError;

/// Errors that a [`RetryPolicy`] knows how to classify
pub trait Retryable {
    /// Whether retrying the same call may succeed
    fn is_retryable(&self) -> bool;

    /// Whether the service asked the caller to slow down
    fn is_rate_limited(&self) -> bool {
        false
    }

    /// Short name of the error kind
    fn kind(&self) -> &'static str;
}

impl Retryable for CoreError {
    fn is_retryable(&self) -> bool {
        CoreError::is_retryable(self)
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, CoreError::RateLimitExceeded(_))
    }

    fn kind(&self) -> &'static str {
        CoreError::kind(self)
    }
}

/// How long to wait after a failed attempt
#[derive(Clone)]
pub enum Delay {
    Constant(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// Attempt number (1-based) to delay
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(d) => f.debug_tuple("Constant").field(d).finish(),
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

/// Which errors are retried
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RetryOn {
    /// Errors that report themselves retryable
    #[default]
    Retryable,
    /// Every error
    Any,
    /// Errors whose kind is in the list
    Kinds(Vec<&'static str>),
}

/// Retry budget and backoff for one kind of call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub nb_times: u32,
    pub delay: Delay,
    pub retry_on: RetryOn,
    /// Factor applied to the delay when the service throttled the call
    pub rate_limit_multiplier: f64,
    /// Randomize each delay down to half its value. Off by default so that
    /// delays are non-decreasing.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            nb_times: 5,
            delay: Delay::default(),
            retry_on: RetryOn::default(),
            rate_limit_multiplier: 4.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy for `respond_*` and decision completion calls
    pub fn respond() -> Self {
        Self::default()
    }

    /// Policy for heartbeats; short, since the next tick retries anyway
    pub fn heartbeat() -> Self {
        Self {
            nb_times: 3,
            delay: Delay::Exponential {
                initial: Duration::from_millis(200),
                multiplier: 2.0,
                max: Duration::from_secs(2),
            },
            ..Self::default()
        }
    }

    /// Single attempt
    pub fn no_retry() -> Self {
        Self {
            nb_times: 1,
            ..Self::default()
        }
    }

    pub fn with_nb_times(mut self, nb_times: u32) -> Self {
        self.nb_times = nb_times;
        self
    }

    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether the policy retries this error
    pub fn should_retry<E: Retryable>(&self, error: &E) -> bool {
        match &self.retry_on {
            RetryOn::Retryable => error.is_retryable(),
            RetryOn::Any => true,
            RetryOn::Kinds(kinds) => kinds.contains(&error.kind()),
        }
    }

    /// Delay after the given failed attempt (1-based), before throttling
    /// and jitter adjustments
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match &self.delay {
            Delay::Constant(d) => *d,
            Delay::Exponential {
                initial,
                multiplier,
                max,
            } => calculate_backoff(*initial, *multiplier, *max, attempt),
            Delay::Custom(f) => f(attempt),
        }
    }

    /// Delay after the given failed attempt for the given error
    pub fn delay_for<E: Retryable>(&self, attempt: u32, error: &E) -> Duration {
        let mut delay = self.base_delay(attempt);
        if error.is_rate_limited() {
            delay = delay.mul_f64(self.rate_limit_multiplier.max(1.0));
        }
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            delay = delay.mul_f64(factor);
        }
        delay
    }
}

/// Exponential backoff for a 1-based attempt, capped at `max`
pub fn calculate_backoff(initial: Duration, multiplier: f64, max: Duration, attempt: u32) -> Duration {
    let base_ms = initial.as_millis() as f64;
    let factor = multiplier.max(1.0).powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
    let backoff_ms = base_ms * factor;
    if !backoff_ms.is_finite() || backoff_ms >= max.as_millis() as f64 {
        return max;
    }
    Duration::from_millis(backoff_ms as u64)
}

/// Run `operation`, retrying errors accepted by `policy`.
///
/// Makes at most `policy.nb_times` attempts and returns the last error once
/// they are exhausted or the error is not retryable.
pub async fn with_delay<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.nb_times.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !policy.should_retry(&error) {
                    return Err(error);
                }
                let delay = policy.delay_for(attempt, &error);
                debug!(
                    attempt,
                    max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
