//! Error types for the fetch pipeline.

use std::path::PathBuf;
use std::time::Duration;

use dem_raster::RasterError;
use thiserror::Error;

use crate::retry::RetryError;

/// Failure of a single upstream request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, timeout or body-read failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx response.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 200 response that is not a raster.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Writing the payload to scratch failed.
    #[error("scratch I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Transient failures worth another attempt. Local disk errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Status { .. } | FetchError::Malformed(_)
        )
    }

    /// Collapse a retry outcome into a single error.
    pub fn from_retry(err: RetryError<FetchError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => FetchError::RetriesExhausted {
                attempts,
                last: Box::new(last),
            },
            RetryError::Permanent(e) => e,
        }
    }
}

/// Failure reading or writing a status record.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("status record serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("rejected status update: {0}")]
    InvalidUpdate(String),
}

/// Stage at which a job stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Probe,
    Download,
    Georeference,
    Merge,
    Verify,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Probe => "probe",
            Stage::Download => "download",
            Stage::Georeference => "georeference",
            Stage::Merge => "merge",
            Stage::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// Reason a job ended in `failed`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("elevation service unavailable: {0}")]
    ServiceUnavailable(FetchError),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("{failed} of {total} chunks failed during {stage}, above the tolerated fraction {max_fraction}")]
    TooManyFailures {
        stage: Stage,
        failed: usize,
        total: usize,
        max_fraction: f64,
    },

    #[error("no usable chunks after {0}")]
    NoUsableChunks(Stage),

    #[error("{stage} failed: {source}")]
    Raster {
        stage: Stage,
        #[source]
        source: RasterError,
    },

    #[error("scratch directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl JobError {
    pub fn raster(stage: Stage, source: RasterError) -> Self {
        Self::Raster { stage, source }
    }
}

/// Failure to hand a job to a worker.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("could not create initial status record: {0}")]
    Status(#[from] StatusError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, JobError>;
