use std::time::Duration;

use satdash_jobstream::{BackoffPolicy, ChannelOptions, JobId, JobStreamError, PageOrigin};

const DEFAULT_ORIGIN: &str = "http://localhost:8000";
const DEFAULT_MAX_RETRIES: u32 = 10;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Watcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub origin: PageOrigin,
    pub job_id: JobId,
    pub options: ChannelOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error(transparent)]
    JobStream(#[from] JobStreamError),
}

impl WatchConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `DASHBOARD_ORIGIN`        | `http://localhost:8000` |
    /// | `JOB_ID`                  | required                |
    /// | `JOB_MAX_RETRIES`         | `10`                    |
    /// | `RECONNECT_BASE_DELAY_MS` | `1000`                  |
    /// | `RECONNECT_MAX_DELAY_MS`  | `30000`                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let origin_raw = lookup("DASHBOARD_ORIGIN").unwrap_or_else(|| DEFAULT_ORIGIN.into());
        let origin = PageOrigin::parse(&origin_raw)?;

        let job_raw = lookup("JOB_ID").ok_or(ConfigError::Missing("JOB_ID"))?;
        let job_id = JobId::new(job_raw.trim()).map_err(JobStreamError::from)?;

        let max_retries: u32 = parse_or("JOB_MAX_RETRIES", &lookup, DEFAULT_MAX_RETRIES, "a u32")?;
        let base_ms: u64 = parse_or(
            "RECONNECT_BASE_DELAY_MS",
            &lookup,
            DEFAULT_BASE_DELAY_MS,
            "a u64",
        )?;
        let max_ms: u64 = parse_or(
            "RECONNECT_MAX_DELAY_MS",
            &lookup,
            DEFAULT_MAX_DELAY_MS,
            "a u64",
        )?;

        Ok(Self {
            origin,
            job_id,
            options: ChannelOptions {
                max_retries,
                backoff: BackoffPolicy::new(
                    Duration::from_millis(base_ms),
                    Duration::from_millis(max_ms),
                ),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value,
        }),
    }
}
