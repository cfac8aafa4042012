//! Human-readable progress lines for a single job.
//!
//! Stages report through a [`StageReporter`] instead of printing. The file
//! implementation mirrors every line into tracing and appends it to the
//! job's `<status>.log`, which the status poller can tail.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

/// Sink for a job's stage messages.
pub trait StageReporter: Send + Sync {
    fn line(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.line(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.line(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.line(Level::ERROR, message);
    }
}

fn emit(job_id: &Uuid, level: Level, message: &str) {
    match level {
        Level::ERROR => error!(job_id = %job_id, "{}", message),
        Level::WARN => warn!(job_id = %job_id, "{}", message),
        _ => info!(job_id = %job_id, "{}", message),
    }
}

/// Reports through tracing only.
#[derive(Debug, Clone)]
pub struct TracingReporter {
    job_id: Uuid,
}

impl TracingReporter {
    pub fn new(job_id: Uuid) -> Self {
        Self { job_id }
    }
}

impl StageReporter for TracingReporter {
    fn line(&self, level: Level, message: &str) {
        emit(&self.job_id, level, message);
    }
}

/// Reports through tracing and appends to a per-job log file.
#[derive(Debug)]
pub struct JobLogReporter {
    job_id: Uuid,
    path: PathBuf,
    file: Mutex<File>,
}

impl JobLogReporter {
    pub fn open(job_id: Uuid, path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            job_id,
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StageReporter for JobLogReporter {
    fn line(&self, level: Level, message: &str) {
        emit(&self.job_id, level, message);

        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        if let Err(e) = writeln!(file, "{} {:<5} {}", stamp, level, message) {
            warn!(job_id = %self.job_id, log = %self.path.display(), error = %e, "Failed to write job log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_status.json.log");

        let reporter = JobLogReporter::open(Uuid::new_v4(), &path).unwrap();
        reporter.info("Fetching 4 chunks");
        reporter.warn("Chunk 1,0 failed");
        drop(reporter);

        // Reopening appends rather than truncating
        JobLogReporter::open(Uuid::new_v4(), &path).unwrap().error("second run");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("INFO") && lines[0].ends_with("Fetching 4 chunks"));
        assert!(lines[1].contains("WARN"));
        assert!(lines[2].ends_with("second run"));
    }
}
