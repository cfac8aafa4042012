//! Configuration for the fetch pipeline.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tunables shared by every job run through one [`crate::Orchestrator`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Largest width or height, in pixels, of a single export request.
    pub max_request_px: u32,

    /// Attempts per request, including the first.
    pub max_retries: u32,

    /// Delay after the first failed attempt; doubles per attempt.
    pub retry_base_delay: Duration,

    /// Ceiling on the backoff delay.
    pub retry_max_delay: Duration,

    /// Whole-request timeout for chunk exports.
    pub request_timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Timeout for the availability probe.
    pub probe_timeout: Duration,

    /// Chunk requests in flight per job.
    pub max_concurrent_fetches: usize,

    /// Payloads smaller than this are inspected for an error body.
    pub min_payload_bytes: u64,

    /// Bounded wait for the status file lock.
    pub status_lock_timeout: Duration,

    /// Tolerated fraction of failed chunks before a job fails.
    pub max_failed_fraction: f64,

    /// Root under which each job gets a scratch directory.
    pub scratch_dir: PathBuf,

    /// Keep scratch directories after successful jobs.
    pub keep_scratch: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_request_px: 4000,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(30),
            max_concurrent_fetches: 4,
            min_payload_bytes: 1000,
            status_lock_timeout: Duration::from_secs(10),
            max_failed_fraction: 0.25,
            scratch_dir: std::env::temp_dir().join("dem-fetch"),
            keep_scratch: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DEM_MAX_REQUEST_PX") {
            if let Ok(px) = val.parse() {
                config.max_request_px = px;
            }
        }

        if let Ok(val) = std::env::var("DEM_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                config.max_retries = n;
            }
        }

        if let Ok(val) = std::env::var("DEM_RETRY_BASE_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                config.retry_base_delay = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("DEM_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.request_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("DEM_MAX_CONCURRENT_FETCHES") {
            if let Ok(n) = val.parse() {
                config.max_concurrent_fetches = n;
            }
        }

        if let Ok(val) = std::env::var("DEM_MAX_FAILED_FRACTION") {
            if let Ok(f) = val.parse() {
                config.max_failed_fraction = f;
            }
        }

        if let Ok(val) = std::env::var("DEM_STATUS_LOCK_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.status_lock_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("DEM_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("DEM_KEEP_SCRATCH") {
            config.keep_scratch = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_request_px == 0 {
            return Err("max_request_px must be > 0".to_string());
        }

        if self.max_retries == 0 {
            return Err("max_retries must be >= 1".to_string());
        }

        if self.max_concurrent_fetches == 0 {
            return Err("max_concurrent_fetches must be > 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.max_failed_fraction) {
            return Err("max_failed_fraction must be between 0.0 and 1.0".to_string());
        }

        if self.request_timeout.is_zero() || self.probe_timeout.is_zero() {
            return Err("timeouts must be > 0".to_string());
        }

        Ok(())
    }

    /// Retry policy for chunk exports and the availability probe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_retries, self.retry_base_delay, self.retry_max_delay)
    }
}
