//! Drain policy settings.
//!
//! The global deadline has no default: callers must decide how long a node may take to drain, either in code via
//! [`DrainConfig::new`] or through the `DRAIN_DEADLINE_SECONDS` environment variable.
use crate::constants::{
    DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_API_REQUESTS_PER_SECOND, DEFAULT_CONFIRM_INTERVAL,
    DEFAULT_MAX_CONCURRENT_EVICTIONS, DEFAULT_MAX_RATE_LIMIT_RETRIES, DEFAULT_RATE_LIMIT_INTERVAL,
    DEFAULT_RATE_LIMIT_MAX_INTERVAL,
};

use snafu::{ensure, OptionExt};
use std::env;
use std::num::{NonZeroU32, NonZeroUsize};
use std::str::FromStr;
use tokio::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

const DEADLINE_ENV_VAR: &str = "DRAIN_DEADLINE_SECONDS";
const MAX_CONCURRENT_EVICTIONS_ENV_VAR: &str = "DRAIN_MAX_CONCURRENT_EVICTIONS";
const ACCEPTANCE_THRESHOLD_ENV_VAR: &str = "DRAIN_ACCEPTANCE_THRESHOLD";
const RATE_LIMIT_INTERVAL_ENV_VAR: &str = "DRAIN_RATE_LIMIT_INTERVAL_SECONDS";
const RATE_LIMIT_MAX_INTERVAL_ENV_VAR: &str = "DRAIN_RATE_LIMIT_MAX_INTERVAL_SECONDS";
const MAX_RATE_LIMIT_RETRIES_ENV_VAR: &str = "DRAIN_MAX_RATE_LIMIT_RETRIES";
const RATE_LIMIT_JITTER_ENV_VAR: &str = "DRAIN_RATE_LIMIT_JITTER";
const CONFIRM_INTERVAL_ENV_VAR: &str = "DRAIN_CONFIRM_INTERVAL_SECONDS";
const CONFIRM_TIMEOUT_ENV_VAR: &str = "DRAIN_CONFIRM_TIMEOUT_SECONDS";
const API_REQUESTS_PER_SECOND_ENV_VAR: &str = "DRAIN_API_REQUESTS_PER_SECOND";

/// The module-wide result type.
type Result<T> = std::result::Result<T, config_error::Error>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainConfig {
    /// Upper bound on the time spent evicting and waiting for every Pod on the node.
    pub deadline: Duration,
    pub max_concurrent_evictions: NonZeroUsize,
    /// Consecutive accepted eviction requests required before waiting for deletion.
    pub acceptance_threshold: u32,
    /// First delay after a rate-limited eviction. Later delays double up to `rate_limit_max_interval`.
    pub rate_limit_interval: Duration,
    pub rate_limit_max_interval: Duration,
    pub max_rate_limit_retries: u32,
    pub rate_limit_jitter: bool,
    pub confirm_interval: Duration,
    /// How long a single Pod may take to disappear after its eviction. `None` waits until the deadline.
    pub confirm_timeout: Option<Duration>,
    pub api_requests_per_second: NonZeroU32,
}

impl DrainConfig {
    /// Creates a config with the given global deadline and default settings for everything else.
    pub fn new(deadline: Duration) -> Self {
        DrainConfig {
            deadline,
            max_concurrent_evictions: DEFAULT_MAX_CONCURRENT_EVICTIONS,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            rate_limit_interval: DEFAULT_RATE_LIMIT_INTERVAL,
            rate_limit_max_interval: DEFAULT_RATE_LIMIT_MAX_INTERVAL,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            rate_limit_jitter: true,
            confirm_interval: DEFAULT_CONFIRM_INTERVAL,
            confirm_timeout: None,
            api_requests_per_second: DEFAULT_API_REQUESTS_PER_SECOND,
        }
    }

    pub fn with_max_concurrent_evictions(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent_evictions = max;
        self
    }

    pub fn with_acceptance_threshold(mut self, threshold: u32) -> Self {
        self.acceptance_threshold = threshold;
        self
    }

    pub fn with_rate_limit_backoff(
        mut self,
        interval: Duration,
        max_interval: Duration,
        max_retries: u32,
        jitter: bool,
    ) -> Self {
        self.rate_limit_interval = interval;
        self.rate_limit_max_interval = max_interval;
        self.max_rate_limit_retries = max_retries;
        self.rate_limit_jitter = jitter;
        self
    }

    pub fn with_confirm_interval(mut self, interval: Duration) -> Self {
        self.confirm_interval = interval;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// Loads the config from `DRAIN_*` environment variables.
    pub fn from_environment() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads the config using `lookup` to resolve variable names to values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let deadline_secs: u64 = parse_var(&lookup, DEADLINE_ENV_VAR)?
            .context(config_error::MissingDeadlineSnafu)?;

        let mut config = DrainConfig::new(Duration::from_secs(deadline_secs));

        if let Some(max) = parse_var(&lookup, MAX_CONCURRENT_EVICTIONS_ENV_VAR)? {
            config.max_concurrent_evictions = max;
        }
        if let Some(threshold) = parse_var(&lookup, ACCEPTANCE_THRESHOLD_ENV_VAR)? {
            config.acceptance_threshold = threshold;
        }
        if let Some(secs) = parse_var(&lookup, RATE_LIMIT_INTERVAL_ENV_VAR)? {
            config.rate_limit_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, RATE_LIMIT_MAX_INTERVAL_ENV_VAR)? {
            config.rate_limit_max_interval = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_var(&lookup, MAX_RATE_LIMIT_RETRIES_ENV_VAR)? {
            config.max_rate_limit_retries = retries;
        }
        if let Some(jitter) = parse_var(&lookup, RATE_LIMIT_JITTER_ENV_VAR)? {
            config.rate_limit_jitter = jitter;
        }
        if let Some(secs) = parse_var(&lookup, CONFIRM_INTERVAL_ENV_VAR)? {
            config.confirm_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<_, u64>(&lookup, CONFIRM_TIMEOUT_ENV_VAR)? {
            config.confirm_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(rps) = parse_var(&lookup, API_REQUESTS_PER_SECOND_ENV_VAR)? {
            config.api_requests_per_second = rps;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the settings that cannot be enforced by their types.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.deadline.is_zero(),
            config_error::InvalidSettingSnafu {
                setting: DEADLINE_ENV_VAR,
                message: "the drain deadline must be greater than zero",
            }
        );
        ensure!(
            self.acceptance_threshold > 0,
            config_error::InvalidSettingSnafu {
                setting: ACCEPTANCE_THRESHOLD_ENV_VAR,
                message: "at least one accepted eviction is required",
            }
        );
        ensure!(
            !self.confirm_interval.is_zero(),
            config_error::InvalidSettingSnafu {
                setting: CONFIRM_INTERVAL_ENV_VAR,
                message: "the deletion poll interval must be greater than zero",
            }
        );
        ensure!(
            self.rate_limit_interval <= self.rate_limit_max_interval,
            config_error::InvalidSettingSnafu {
                setting: RATE_LIMIT_MAX_INTERVAL_ENV_VAR,
                message: "the maximum backoff must not be shorter than the initial backoff",
            }
        );
        Ok(())
    }

    /// The delays to wait after each rate-limited eviction request. The iterator ends once the retry budget is spent.
    ///
    /// The first delay is `rate_limit_interval` and each following delay doubles, capped at `rate_limit_max_interval`.
    pub fn rate_limit_backoff(&self) -> impl Iterator<Item = Duration> + Send + Sync {
        // `ExponentialBackoff` yields `factor * base^n`, starting at n = 1.
        let factor = (self.rate_limit_interval.as_millis() as u64 / 2).max(1);
        let with_jitter = self.rate_limit_jitter;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.rate_limit_max_interval)
            .map(move |delay| if with_jitter { jitter(delay) } else { delay })
            .take(self.max_rate_limit_retries as usize)
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .ok()
                .context(config_error::UnparsableSettingSnafu {
                    setting: name,
                    value: value.clone(),
                })
        })
        .transpose()
}

pub mod config_error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display(
            "The drain deadline is required: set 'DRAIN_DEADLINE_SECONDS' to the number of seconds a drain may take."
        ))]
        MissingDeadline,

        #[snafu(display("Could not parse '{}={}'", setting, value))]
        UnparsableSetting {
            setting: &'static str,
            value: String,
        },

        #[snafu(display("Invalid value for '{}': {}", setting, message))]
        InvalidSetting {
            setting: &'static str,
            message: &'static str,
        },
    }
}
