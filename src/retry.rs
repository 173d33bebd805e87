//! Retry configuration and backoff strategies.

use crate::error::HttpClientError;
use http::HeaderMap;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Floor applied to jittered delays so a misconfigured base can never
/// produce a zero-delay tight loop.
const MIN_JITTERED_DELAY: Duration = Duration::from_millis(100);

/// Cap applied to server-supplied `Retry-After` values.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Predicate deciding whether an error is worth another attempt.
pub type RetryCondition = Arc<dyn Fn(&HttpClientError) -> bool + Send + Sync>;

/// Retry configuration.
#[derive(Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first dispatch. A value of
    /// `0` is treated like `1`: the request is dispatched exactly once.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Status codes that trigger a retry in addition to all 5xx responses.
    pub retry_status_codes: Vec<u16>,
    /// Honor a `Retry-After` header on 429 responses instead of the
    /// computed backoff.
    pub respect_retry_after: bool,
    /// Custom predicate overriding the default eligibility rules.
    pub condition: Option<RetryCondition>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(30),
                multiplier: 2.0,
                jitter: 0.1,
            },
            retry_status_codes: vec![408, 429],
            respect_retry_after: true,
            condition: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("retry_status_codes", &self.retry_status_codes)
            .field("respect_retry_after", &self.respect_retry_after)
            .field("condition", &self.condition.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RetryConfig {
    /// Create a retry config with exponential backoff and default jitter.
    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Exponential {
                initial: initial_delay,
                max: Duration::from_secs(30),
                multiplier: 2.0,
                jitter: 0.1,
            },
            ..Default::default()
        }
    }

    /// Create a retry config with constant delay.
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Constant(delay),
            ..Default::default()
        }
    }

    /// Create a retry config with no delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::None,
            ..Default::default()
        }
    }

    /// Replace the set of extra retryable status codes.
    pub fn with_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.retry_status_codes = codes;
        self
    }

    /// Install a custom retry predicate.
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&HttpClientError) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Disable honoring of `Retry-After` headers.
    pub fn ignore_retry_after(mut self) -> Self {
        self.respect_retry_after = false;
        self
    }

    /// Check if a status code should trigger a retry.
    pub fn should_retry_status(&self, status: u16) -> bool {
        (500..=599).contains(&status) || self.retry_status_codes.contains(&status)
    }

    /// Check if an error is eligible for another attempt.
    pub fn should_retry(&self, error: &HttpClientError) -> bool {
        if let Some(condition) = &self.condition {
            return condition(error);
        }
        match error {
            HttpClientError::Network { .. } | HttpClientError::Timeout { .. } => true,
            HttpClientError::Http { status, .. } => self.should_retry_status(*status),
            _ => false,
        }
    }

    /// Delay to sleep before the attempt that follows `attempt` (1-based).
    ///
    /// For a 429 carrying `Retry-After`, the server-directed pace wins over
    /// the computed backoff when `respect_retry_after` is set.
    pub fn delay_for(&self, error: &HttpClientError, attempt: u32) -> Duration {
        if self.respect_retry_after
            && let HttpClientError::Http {
                status: 429,
                headers,
                ..
            } = error
            && let Some(delay) = parse_retry_after(headers)
        {
            return delay;
        }
        self.backoff.delay_for_attempt(attempt)
    }
}

/// Parse a `Retry-After` header given in seconds, capped at 30 s.
///
/// Returns `None` for absent, non-numeric, or non-positive values.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let seconds: u64 = headers
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    if seconds == 0 {
        return None;
    }
    Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER))
}

/// Backoff strategy for retries.
#[derive(Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount per attempt.
    Linear {
        /// Delay increment per attempt.
        delay: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff with uniform jitter.
    Exponential {
        /// Delay before the second attempt.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier per attempt (typically 2.0).
        multiplier: f64,
        /// Jitter fraction, e.g. 0.1 for ±10%. Zero disables jitter.
        jitter: f64,
    },
    /// Caller-supplied delay function of the attempt number (1-based).
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Constant(d) => f.debug_tuple("Constant").field(d).finish(),
            Self::Linear { delay, max } => f
                .debug_struct("Linear")
                .field("delay", delay)
                .field("max", max)
                .finish(),
            Self::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("max", max)
                .field("multiplier", multiplier)
                .field("jitter", jitter)
                .finish(),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay after a given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear { delay, max } => delay.saturating_mul(attempt).min(*max),
            Self::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let factor = multiplier.powi(attempt as i32 - 1);
                let base = Duration::from_millis((initial.as_millis() as f64 * factor) as u64)
                    .min(*max);
                if *jitter <= 0.0 {
                    return base;
                }
                let spread = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
                Duration::from_millis((base.as_millis() as f64 * spread) as u64)
                    .max(MIN_JITTERED_DELAY)
            }
            Self::Custom(f) => f(attempt),
        }
    }
}
