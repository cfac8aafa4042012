//! Hand jobs to background workers.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, JobError, Result};
use crate::job::JobSpec;
use crate::orchestrator::{JobSummary, Orchestrator};
use crate::outputs::log_path_for;
use crate::reporter::{JobLogReporter, StageReporter, TracingReporter};
use crate::status::StatusRecord;

/// A dispatched job. Outcomes are also visible through the status file.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub output_path: PathBuf,
    pub status_path: PathBuf,
    pub join: JoinHandle<Result<JobSummary>>,
}

impl JobHandle {
    /// Wait for the worker to finish.
    pub async fn wait(self) -> Result<JobSummary> {
        self.join.await.map_err(|e| JobError::Worker(e.to_string()))?
    }
}

/// Spawns one worker task per job.
#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Write the `starting` record and spawn the worker. Returns immediately.
    pub async fn dispatch(&self, job: JobSpec) -> std::result::Result<JobHandle, DispatchError> {
        job.validate().map_err(DispatchError::InvalidJob)?;

        if let Some(parent) = job.status_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let store = self.orchestrator.store();
        store
            .create(
                &job.status_path,
                StatusRecord::starting(job.display_name.clone(), job.variant),
            )
            .await?;

        let job_id = Uuid::new_v4();
        let reporter: Box<dyn StageReporter> = match JobLogReporter::open(job_id, log_path_for(&job.status_path)) {
            Ok(reporter) => Box::new(reporter),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Job log unavailable, reporting to tracing only");
                Box::new(TracingReporter::new(job_id))
            }
        };

        info!(
            job_id = %job_id,
            bbox = %job.bbox,
            variant = %job.variant,
            output = %job.output_path.display(),
            "Dispatching DEM job"
        );

        let output_path = job.output_path.clone();
        let status_path = job.status_path.clone();
        let orchestrator = self.orchestrator.clone();
        let join = tokio::spawn(async move { orchestrator.run(job_id, &job, reporter.as_ref()).await });

        Ok(JobHandle {
            job_id,
            output_path,
            status_path,
            join,
        })
    }
}
