//! Scan manager configuration.

use crate::core::ManagerError;

use std::time::Duration;

/// Environment variable for the poll interval, in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "SCAN_MANAGER_POLL_INTERVAL_MS";
/// Environment variable for the heartbeat interval, in seconds.
pub const ENV_HEARTBEAT_SECS: &str = "SCAN_MANAGER_HEARTBEAT_SECS";
/// Environment variable for the job timeout, in seconds. `0` disables it.
pub const ENV_JOB_TIMEOUT_SECS: &str = "SCAN_MANAGER_JOB_TIMEOUT_SECS";
/// Environment variable for the consecutive status error limit.
pub const ENV_STATUS_ERROR_LIMIT: &str = "SCAN_MANAGER_STATUS_ERROR_LIMIT";
/// Environment variable for the shutdown grace period, in seconds.
pub const ENV_SHUTDOWN_TIMEOUT_SECS: &str = "SCAN_MANAGER_SHUTDOWN_TIMEOUT_SECS";

/// Configuration for the scan manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanManagerConfig {
    /// Sleep between scheduling loop iterations.
    pub poll_interval: Duration,

    /// How often the loop logs a heartbeat with the manager state.
    pub heartbeat_interval: Duration,

    /// Maximum time a job may occupy the running slot before it is killed.
    pub job_timeout: Option<Duration>,

    /// Consecutive failed status checks tolerated before a job is given up on.
    pub status_error_limit: u32,

    /// How long `stop()` waits for the current job to exit after terminating it.
    pub shutdown_timeout: Duration,
}

impl Default for ScanManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(60),
            job_timeout: None,
            status_error_limit: 10,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ScanManagerConfig {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configuration from `SCAN_MANAGER_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ManagerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ManagerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_HEARTBEAT_SECS)? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_JOB_TIMEOUT_SECS)? {
            config.job_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(limit) = parse_var::<u32, _>(&lookup, ENV_STATUS_ERROR_LIMIT)? {
            config.status_error_limit = limit;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_SHUTDOWN_TIMEOUT_SECS)? {
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Disables the job timeout.
    pub fn without_job_timeout(mut self) -> Self {
        self.job_timeout = None;
        self
    }

    /// Sets the consecutive status error limit.
    pub fn with_status_error_limit(mut self, limit: u32) -> Self {
        self.status_error_limit = limit;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Checks that the configuration can drive a scheduling loop.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.poll_interval.is_zero() {
            return Err(ManagerError::configuration("poll interval must be positive"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ManagerError::configuration(
                "heartbeat interval must be positive",
            ));
        }
        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ManagerError::configuration(
                "job timeout must be positive when set",
            ));
        }
        if self.status_error_limit == 0 {
            return Err(ManagerError::configuration(
                "status error limit must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ManagerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            ManagerError::configuration(format!("invalid value '{raw}' for {key}: {e}"))
        }),
    }
}
