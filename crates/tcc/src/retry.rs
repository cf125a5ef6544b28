//! Bounded retry with exponential backoff for confirm and cancel calls.
//!
//! A [`RetryPolicy`] hands out a fresh [`Backoff`] for every retry-guarded
//! call. [`retry`] resets it, runs the operation and, after each failure,
//! asks the backoff for the next delay. `None` ends the loop and the last
//! failure is returned.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::BranchError;

/// A schedule of delays between attempts.
pub trait Backoff: Send {
    /// Returns the delay before the next attempt, or `None` to stop retrying.
    fn next_backoff(&mut self) -> Option<Duration>;

    /// Restores the schedule to its initial state.
    fn reset(&mut self);
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn next_backoff(&mut self) -> Option<Duration> {
        (**self).next_backoff()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Delays that grow geometrically with random jitter.
///
/// Wraps the schedule from the `backoff` crate: each delay is drawn from
/// `[interval * (1 - randomization_factor), interval * (1 + randomization_factor)]`,
/// the interval is then multiplied by `multiplier` and capped at
/// `max_interval`, and the schedule stops once `max_elapsed_time` has passed.
#[derive(Debug)]
pub struct ExponentialBackoff {
    inner: backoff::ExponentialBackoff,
}

impl ExponentialBackoff {
    /// Creates a schedule from the interval settings of `config`.
    ///
    /// Non-finite factors fall back to the defaults.
    pub fn new(config: &RetryConfig) -> Self {
        let defaults = RetryConfig::default();
        let multiplier = finite_or(config.multiplier, defaults.multiplier).max(1.0);
        let randomization_factor =
            finite_or(config.randomization_factor, defaults.randomization_factor).clamp(0.0, 1.0);

        let inner = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(config.initial_interval)
            .with_max_interval(config.max_interval.max(config.initial_interval))
            .with_multiplier(multiplier)
            .with_randomization_factor(randomization_factor)
            .with_max_elapsed_time(config.max_elapsed_time)
            .build();
        Self { inner }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

impl Backoff for ExponentialBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        backoff::backoff::Backoff::next_backoff(&mut self.inner)
    }

    fn reset(&mut self) {
        backoff::backoff::Backoff::reset(&mut self.inner)
    }
}

/// Stops an inner schedule after a fixed number of retries.
#[derive(Debug, Clone)]
pub struct WithMaxRetries<B> {
    inner: B,
    max_retries: u64,
    retries: u64,
}

impl<B: Backoff> WithMaxRetries<B> {
    /// Wraps `inner`, allowing at most `max_retries` retries.
    pub fn new(inner: B, max_retries: u64) -> Self {
        Self {
            inner,
            max_retries,
            retries: 0,
        }
    }
}

impl<B: Backoff> Backoff for WithMaxRetries<B> {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        self.retries += 1;
        self.inner.next_backoff()
    }

    fn reset(&mut self) {
        self.retries = 0;
        self.inner.reset();
    }
}

/// Source of backoff schedules for retry-guarded calls.
pub trait RetryPolicy: Send + Sync {
    /// Returns a fresh schedule for one retry-guarded call.
    fn backoff(&self) -> Box<dyn Backoff>;
}

/// Exponential backoff bounded by a maximum retry count.
#[derive(Debug, Clone, Default)]
pub struct ExponentialRetryPolicy {
    config: RetryConfig,
}

impl ExponentialRetryPolicy {
    /// Creates a policy from `config`.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the policy settings.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl RetryPolicy for ExponentialRetryPolicy {
    fn backoff(&self) -> Box<dyn Backoff> {
        Box::new(WithMaxRetries::new(
            ExponentialBackoff::new(&self.config),
            self.config.max_retries,
        ))
    }
}

/// Result of a retry-guarded call.
#[derive(Debug)]
pub struct RetryOutcome {
    /// Number of times the operation ran.
    pub attempts: u32,
    /// Result of the last attempt.
    pub result: Result<(), BranchError>,
}

/// Runs `operation` until it succeeds or `backoff` stops.
pub async fn retry<F, Fut>(mut operation: F, backoff: &mut dyn Backoff) -> RetryOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), BranchError>>,
{
    backoff.reset();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(()) => {
                return RetryOutcome {
                    attempts,
                    result: Ok(()),
                };
            }
            Err(err) => err,
        };

        let Some(delay) = backoff.next_backoff() else {
            tracing::warn!(attempts, error = %err, "retries exhausted");
            return RetryOutcome {
                attempts,
                result: Err(err),
            };
        };

        tracing::warn!(attempts, ?delay, error = %err, "attempt failed, retrying");
        tokio::time::sleep(delay).await;
    }
}
