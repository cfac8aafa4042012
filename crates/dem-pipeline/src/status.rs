//! Per-job status record shared with external pollers.
//!
//! The record is a small JSON file next to the job output. Writers go through
//! [`StatusStore::update`], which holds the sidecar lock for the whole
//! read-modify-write and replaces the file with a rename. Readers never take
//! the lock; they get an `unknown` record when the file is missing or
//! unparseable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dem_common::DataVariant;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StatusError;
use crate::lock::FileLock;

/// Job lifecycle state as written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum JobStatus {
    Starting,
    Downloading,
    Processing,
    Complete,
    Failed,
    /// Missing, unreadable or unrecognised record. Never written by a job.
    #[default]
    Unknown,
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "starting" => JobStatus::Starting,
            "downloading" => JobStatus::Downloading,
            "processing" => JobStatus::Processing,
            "complete" | "completed" => JobStatus::Complete,
            "failed" | "error" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        }
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Downloading => "downloading",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Legal forward moves of the job state machine.
    ///
    /// Staying in the same non-terminal state is allowed (progress updates).
    /// `Unknown` may move anywhere so a job can recover a clobbered record.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (_, Unknown) => false,
            (Complete | Failed, _) => false,
            (Unknown, _) => true,
            (_, Failed) => true,
            (a, b) if *a == b => true,
            (Starting, Downloading) => true,
            (Downloading, Processing) => true,
            (Processing, Complete) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size of a finished output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSize {
    pub bytes: u64,
    /// Megabytes rounded to two decimals.
    pub mb: f64,
    /// e.g. `"12.34 MB"`
    pub formatted: String,
}

impl FileSize {
    pub fn from_bytes(bytes: u64) -> Self {
        let mb = bytes as f64 / (1024.0 * 1024.0);
        Self {
            bytes,
            mb: (mb * 100.0).round() / 100.0,
            formatted: format!("{:.2} MB", mb),
        }
    }

    pub async fn of_file(path: &Path) -> std::io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(Self::from_bytes(meta.len()))
    }
}

/// Contents of a status file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default)]
    pub status: JobStatus,
    /// 0-100, advisory only. Check `status` for completion.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: String,
    /// UNIX seconds of the last write.
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, alias = "dataType", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<FileSize>,
    /// Keys written by other tools, carried through updates untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusRecord {
    /// Initial record written at dispatch.
    pub fn starting(display_name: impl Into<String>, data_type: DataVariant) -> Self {
        Self {
            status: JobStatus::Starting,
            progress: 0.0,
            message: "Initializing...".to_string(),
            timestamp: now_unix(),
            display_name: Some(display_name.into()),
            data_type: Some(data_type),
            ..Default::default()
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Unknown,
            message: message.into(),
            timestamp: now_unix(),
            ..Default::default()
        }
    }
}

/// Current time as fractional UNIX seconds.
pub fn now_unix() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Mutation applied to a record under the lock.
pub type StatusMutator = Box<dyn FnOnce(&mut StatusRecord) + Send>;

/// Storage for status records.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Lock-free, tolerant read. Never fails; see [`StatusRecord::unknown`].
    async fn read(&self, path: &Path) -> StatusRecord;

    /// Write `record` as the new content of `path`, replacing anything there.
    async fn create(&self, path: &Path, record: StatusRecord) -> Result<(), StatusError>;

    /// Read-modify-write under the lock. Returns the record as written.
    async fn update(&self, path: &Path, mutate: StatusMutator) -> Result<StatusRecord, StatusError>;
}

/// JSON file store with a `<status>.lock` sidecar.
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    lock_timeout: Duration,
}

impl FileStatusStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self { lock_timeout }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

impl Default for FileStatusStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Parse a status file body.
pub fn parse_record(bytes: &[u8]) -> Result<StatusRecord, serde_json::Error> {
    serde_json::from_slice(bytes)
}

async fn read_record(path: &Path) -> StatusRecord {
    match tokio::fs::read(path).await {
        Ok(bytes) => match parse_record(&bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Unparseable status record");
                StatusRecord::unknown(format!("Unreadable status record: {}", e))
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            StatusRecord::unknown("No status information found")
        }
        Err(e) => StatusRecord::unknown(format!("Status file could not be read: {}", e)),
    }
}

async fn write_atomic(path: &Path, record: &StatusRecord) -> Result<(), StatusError> {
    let body = serde_json::to_vec_pretty(record)?;
    let tmp = tmp_path_for(path);
    tokio::fs::write(&tmp, &body).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn read(&self, path: &Path) -> StatusRecord {
        read_record(path).await
    }

    async fn create(&self, path: &Path, mut record: StatusRecord) -> Result<(), StatusError> {
        let _lock = FileLock::acquire(path, self.lock_timeout).await?;
        record.timestamp = now_unix();
        write_atomic(path, &record).await
    }

    async fn update(&self, path: &Path, mutate: StatusMutator) -> Result<StatusRecord, StatusError> {
        let _lock = FileLock::acquire(path, self.lock_timeout).await?;

        let mut record = read_record(path).await;
        let display_name = record.display_name.clone();
        let data_type = record.data_type;

        mutate(&mut record);

        if record.display_name.is_none() {
            record.display_name = display_name;
        }
        if record.data_type.is_none() {
            record.data_type = data_type;
        }
        record.timestamp = now_unix();

        write_atomic(path, &record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_status_spellings() {
        let r: StatusRecord =
            serde_json::from_str(r#"{"status":"completed","message":"done","timestamp":1.5}"#).unwrap();
        assert_eq!(r.status, JobStatus::Complete);

        let r: StatusRecord = serde_json::from_str(r#"{"status":"error","message":"boom"}"#).unwrap();
        assert_eq!(r.status, JobStatus::Failed);

        let r: StatusRecord = serde_json::from_str(r#"{"status":"paused"}"#).unwrap();
        assert_eq!(r.status, JobStatus::Unknown);
    }

    #[test]
    fn test_legacy_data_type_key() {
        let r: StatusRecord =
            serde_json::from_str(r#"{"status":"starting","dataType":"rgb","display_name":"x"}"#).unwrap();
        assert_eq!(r.data_type, Some(DataVariant::Rgb));
        assert_eq!(r.display_name.as_deref(), Some("x"));
    }

    #[test]
    fn test_extra_keys_preserved() {
        let r: StatusRecord =
            serde_json::from_str(r#"{"status":"downloading","logs":["a"],"owner":"ui"}"#).unwrap();
        assert_eq!(r.extra.len(), 2);
        let out = serde_json::to_value(&r).unwrap();
        assert_eq!(out["owner"], "ui");
        assert_eq!(out["status"], "downloading");
    }

    #[test]
    fn test_file_size_format() {
        let s = FileSize::from_bytes(5 * 1024 * 1024 + 300 * 1024);
        assert_eq!(s.mb, 5.29);
        assert_eq!(s.formatted, "5.29 MB");
        assert_eq!(FileSize::from_bytes(0).formatted, "0.00 MB");
    }

    #[test]
    fn test_transitions() {
        use JobStatus::*;
        assert!(Starting.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Complete));
        assert!(Starting.can_transition_to(Failed));
        assert!(!Starting.can_transition_to(Complete));
        assert!(!Processing.can_transition_to(Downloading));
        assert!(!Complete.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(Unknown.can_transition_to(Downloading));
    }

    #[tokio::test]
    async fn test_update_keeps_identity_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_status.json");
        let store = FileStatusStore::default();

        store
            .create(&path, StatusRecord::starting("Survey (5m LiDAR DEM)", DataVariant::Raw))
            .await
            .unwrap();

        let written = store
            .update(
                &path,
                Box::new(|r| {
                    r.status = JobStatus::Downloading;
                    r.display_name = None;
                    r.data_type = None;
                }),
            )
            .await
            .unwrap();

        assert_eq!(written.status, JobStatus::Downloading);
        assert_eq!(written.display_name.as_deref(), Some("Survey (5m LiDAR DEM)"));
        assert_eq!(written.data_type, Some(DataVariant::Raw));
        assert!(!tmp_path_for(&path).exists());
        assert_eq!(store.read(&path).await, written);
    }

    #[tokio::test]
    async fn test_read_missing_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let record = FileStatusStore::default().read(&dir.path().join("nope.json")).await;
        assert_eq!(record.status, JobStatus::Unknown);
    }
}
