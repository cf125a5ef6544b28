//! Coordinator configuration.

use std::time::Duration;

use tokio::sync::Semaphore;

/// Default number of retries for confirm and cancel calls.
pub const DEFAULT_MAX_RETRIES: u64 = 10;

/// Backoff schedule used for confirm and cancel calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; an always-failing call runs
    /// `max_retries + 1` times.
    pub max_retries: u64,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound for a single delay.
    pub max_interval: Duration,
    /// Growth factor applied to the delay after every retry.
    pub multiplier: f64,
    /// Jitter applied to each delay, as a fraction of the delay.
    pub randomization_factor: f64,
    /// Stop retrying once this much time has passed. `None` never stops on
    /// elapsed time.
    pub max_elapsed_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_elapsed_time: Some(Duration::from_secs(15 * 60)),
        }
    }
}

/// Immutable coordinator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectorConfig {
    /// Backoff schedule for confirm and cancel.
    pub retry: RetryConfig,
    /// How many retry-guarded calls may run at once across all branches.
    /// Defaults to 1, which serializes confirm and cancel calls.
    pub retry_concurrency: usize,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            retry_concurrency: 1,
        }
    }
}

/// A named adjustment applied to the default [`DirectorConfig`].
#[derive(Debug, Clone, PartialEq)]
pub enum DirectorOption {
    /// Bounds confirm and cancel retries.
    MaxRetries(u64),
    /// Delay before the first retry.
    InitialInterval(Duration),
    /// Upper bound for a single retry delay.
    MaxInterval(Duration),
    /// Growth factor of the retry delay.
    Multiplier(f64),
    /// Jitter fraction of the retry delay.
    RandomizationFactor(f64),
    /// Total time budget for retries of one call.
    MaxElapsedTime(Option<Duration>),
    /// Number of retry-guarded calls allowed to run at once.
    RetryConcurrency(usize),
}

impl DirectorConfig {
    /// Builds a configuration from the defaults and the given options.
    ///
    /// Later options override earlier ones.
    pub fn from_options(options: impl IntoIterator<Item = DirectorOption>) -> Self {
        options
            .into_iter()
            .fold(Self::default(), |config, option| config.with(option))
    }

    /// Returns a copy of this configuration with `option` applied.
    ///
    /// Out-of-range values are clamped; non-finite factors are ignored.
    pub fn with(mut self, option: DirectorOption) -> Self {
        match option {
            DirectorOption::MaxRetries(n) => self.retry.max_retries = n,
            DirectorOption::InitialInterval(d) => self.retry.initial_interval = d,
            DirectorOption::MaxInterval(d) => self.retry.max_interval = d,
            DirectorOption::Multiplier(m) if m.is_finite() => self.retry.multiplier = m.max(1.0),
            DirectorOption::RandomizationFactor(r) if r.is_finite() => {
                self.retry.randomization_factor = r.clamp(0.0, 1.0)
            }
            DirectorOption::Multiplier(_) | DirectorOption::RandomizationFactor(_) => {}
            DirectorOption::MaxElapsedTime(d) => self.retry.max_elapsed_time = d,
            DirectorOption::RetryConcurrency(n) => {
                self.retry_concurrency = n.clamp(1, Semaphore::MAX_PERMITS)
            }
        }
        self
    }

    /// Loads configuration from environment variables, falling back to
    /// defaults for missing or unparsable values.
    ///
    /// - `TCC_MAX_RETRIES` (default: `10`)
    /// - `TCC_RETRY_INITIAL_INTERVAL_MS` (default: `500`)
    /// - `TCC_RETRY_MAX_INTERVAL_MS` (default: `60000`)
    /// - `TCC_RETRY_MULTIPLIER` (default: `1.5`)
    /// - `TCC_RETRY_RANDOMIZATION` (default: `0.5`)
    /// - `TCC_RETRY_MAX_ELAPSED_MS` (default: `900000`, `0` disables the limit)
    /// - `TCC_RETRY_CONCURRENCY` (default: `1`)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Vec::new();

        if let Some(n) = parse(&lookup, "TCC_MAX_RETRIES") {
            options.push(DirectorOption::MaxRetries(n));
        }
        if let Some(ms) = parse(&lookup, "TCC_RETRY_INITIAL_INTERVAL_MS") {
            options.push(DirectorOption::InitialInterval(Duration::from_millis(ms)));
        }
        if let Some(ms) = parse(&lookup, "TCC_RETRY_MAX_INTERVAL_MS") {
            options.push(DirectorOption::MaxInterval(Duration::from_millis(ms)));
        }
        if let Some(m) = parse(&lookup, "TCC_RETRY_MULTIPLIER") {
            options.push(DirectorOption::Multiplier(m));
        }
        if let Some(r) = parse(&lookup, "TCC_RETRY_RANDOMIZATION") {
            options.push(DirectorOption::RandomizationFactor(r));
        }
        if let Some(ms) = parse::<u64>(&lookup, "TCC_RETRY_MAX_ELAPSED_MS") {
            let limit = (ms > 0).then(|| Duration::from_millis(ms));
            options.push(DirectorOption::MaxElapsedTime(limit));
        }
        if let Some(n) = parse(&lookup, "TCC_RETRY_CONCURRENCY") {
            options.push(DirectorOption::RetryConcurrency(n));
        }

        Self::from_options(options)
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
