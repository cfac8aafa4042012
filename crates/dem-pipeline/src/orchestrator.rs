//! Drives one job from probe to verified output.
//!
//! ```text
//! starting ──probe──▶ downloading ──fetch──▶ processing ──georef/merge/verify──▶ complete
//!     └──────────────────┴─────────────────────────┴──────────────────────────▶ failed
//! ```
//!
//! Every stage error is turned into a `failed` status record here. Status
//! write failures are logged and never stop the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dem_common::DataVariant;
use dem_raster::stitch::{info_file_path, world_file_path};
use dem_raster::{merge, promote_rgb, stamp, stitch_rgb, verify_geotiff, verify_png, StitchLayout, StitchTile, VerifiedOutput};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{JobError, Result, Stage};
use crate::fetcher::ElevationService;
use crate::job::JobSpec;
use crate::planner::{plan, ChunkPlan, ChunkRequest};
use crate::reporter::StageReporter;
use crate::status::{FileSize, JobStatus, StatusMutator, StatusStore};

const DOWNLOAD_START: f64 = 5.0;
const DOWNLOAD_END: f64 = 50.0;
const GEOREF_END: f64 = 80.0;
const MERGE_PROGRESS: f64 = 80.0;
const VERIFY_PROGRESS: f64 = 90.0;

/// Status and progress last published for a run.
///
/// Progress never goes down and illegal state moves are dropped, so pollers
/// see a monotonic record even if stages report out of order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressTracker {
    status: JobStatus,
    progress: f64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            status: JobStatus::Starting,
            progress: 0.0,
        }
    }
}

impl ProgressTracker {
    /// Accept a move to `status` at `progress`, returning what to publish.
    pub fn advance(&mut self, status: JobStatus, progress: f64) -> Option<(JobStatus, f64)> {
        if !self.status.can_transition_to(status) {
            return None;
        }
        let progress = if progress.is_finite() { progress.clamp(0.0, 100.0) } else { self.progress };
        self.status = status;
        self.progress = self.progress.max(progress);
        Some((self.status, self.progress))
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }
}

/// `start + (end - start) * done / total`
fn stage_progress(start: f64, end: f64, done: usize, total: usize) -> f64 {
    if total == 0 {
        return end;
    }
    start + (end - start) * done as f64 / total as f64
}

/// Fail when no chunk survived or the failed share exceeds `max_fraction`.
pub fn check_failure_budget(stage: Stage, failed: usize, total: usize, max_fraction: f64) -> Result<()> {
    if total == 0 || failed >= total {
        return Err(JobError::NoUsableChunks(stage));
    }
    if failed as f64 / total as f64 > max_fraction {
        return Err(JobError::TooManyFailures {
            stage,
            failed,
            total,
            max_fraction,
        });
    }
    Ok(())
}

/// Outcome of a successful job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub output_path: PathBuf,
    pub chunks_total: usize,
    pub chunks_used: usize,
    pub width: u32,
    pub height: u32,
    pub file_size: FileSize,
    pub elapsed: Duration,
}

/// Runs jobs against one elevation service and status store.
pub struct Orchestrator {
    config: PipelineConfig,
    service: Arc<dyn ElevationService>,
    store: Arc<dyn StatusStore>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, service: Arc<dyn ElevationService>, store: Arc<dyn StatusStore>) -> Self {
        Self { config, service, store }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn StatusStore> {
        self.store.clone()
    }

    /// Run `job` to a terminal status.
    ///
    /// The returned error has already been written to the status file.
    #[instrument(skip(self, job, reporter), fields(output = %job.output_path.display()))]
    pub async fn run(&self, job_id: Uuid, job: &JobSpec, reporter: &dyn StageReporter) -> Result<JobSummary> {
        let mut run = JobRun {
            orchestrator: self,
            job_id,
            job,
            reporter,
            tracker: ProgressTracker::default(),
            scratch: scratch_dir_for(&self.config.scratch_dir, job_id),
            started: Instant::now(),
        };

        match run.execute().await {
            Ok(summary) => {
                metrics::counter!("dem_jobs_total", "outcome" => "complete").increment(1);
                metrics::histogram!("dem_job_duration_seconds").record(summary.elapsed.as_secs_f64());
                if !self.config.keep_scratch {
                    if let Err(e) = tokio::fs::remove_dir_all(&run.scratch).await {
                        debug!(scratch = %run.scratch.display(), error = %e, "Scratch cleanup failed");
                    }
                }
                Ok(summary)
            }
            Err(e) => {
                metrics::counter!("dem_jobs_total", "outcome" => "failed").increment(1);
                reporter.error(&format!("DEM download failed: {}", e));
                reporter.error(&format!(
                    "Total execution time: {:.2} seconds",
                    run.started.elapsed().as_secs_f64()
                ));
                let progress = run.tracker.progress();
                run.publish(JobStatus::Failed, progress, format!("Error: {}", e), None).await;
                info!(job_id = %job_id, scratch = %run.scratch.display(), "Job failed, scratch kept for inspection");
                Err(e)
            }
        }
    }
}

/// State of one in-flight job.
struct JobRun<'a> {
    orchestrator: &'a Orchestrator,
    job_id: Uuid,
    job: &'a JobSpec,
    reporter: &'a dyn StageReporter,
    tracker: ProgressTracker,
    scratch: PathBuf,
    started: Instant,
}

/// Chunks that made it through a stage.
struct Survivors {
    total: usize,
    failed: usize,
    ok: Vec<(ChunkRequest, PathBuf)>,
}

/// Final output before verification.
struct Assembled {
    chunks_used: usize,
}

impl<'a> JobRun<'a> {
    fn config(&self) -> &PipelineConfig {
        &self.orchestrator.config
    }

    async fn publish(
        &mut self,
        status: JobStatus,
        progress: f64,
        message: impl Into<String>,
        file_size: Option<FileSize>,
    ) {
        let Some((status, progress)) = self.tracker.advance(status, progress) else {
            debug!(from = %self.tracker.status(), to = %status, "Ignoring illegal status transition");
            return;
        };

        let message = message.into();
        let mutator: StatusMutator = Box::new(move |record| {
            record.status = status;
            record.progress = (progress * 10.0).round() / 10.0;
            record.message = message;
            if file_size.is_some() {
                record.file_size = file_size;
            }
        });

        if let Err(e) = self.orchestrator.store.update(&self.job.status_path, mutator).await {
            warn!(
                job_id = %self.job_id,
                status_file = %self.job.status_path.display(),
                error = %e,
                "Status update failed, continuing"
            );
        }
    }

    async fn execute(&mut self) -> Result<JobSummary> {
        let job = self.job;
        job.validate().map_err(JobError::InvalidJob)?;

        self.reporter.info(&format!(
            "Starting DEM download for {}, data type: {}",
            job.source_name, job.variant
        ));
        self.reporter.info(&format!("Bounding box: {}", job.bbox));

        self.publish(JobStatus::Starting, 0.0, "Checking elevation service...", None).await;
        self.orchestrator
            .service
            .probe(&job.service_url)
            .await
            .map_err(JobError::ServiceUnavailable)?;

        let plan = plan(&job.bbox, job.resolution_m, self.config().max_request_px)?;
        self.reporter.info(&format!(
            "Full area needs {}x{} px; requesting {} chunk(s) of {}x{} px",
            plan.required_width,
            plan.required_height,
            plan.chunk_count(),
            plan.chunk_width,
            plan.chunk_height
        ));
        tokio::fs::create_dir_all(&self.scratch).await?;

        let downloaded = self.download(&plan).await?;

        let assembled = match job.variant {
            DataVariant::Raw => {
                let georeferenced = self.georeference(downloaded).await?;
                self.assemble_raw(&plan, georeferenced).await?
            }
            DataVariant::Rgb => {
                self.publish(JobStatus::Processing, DOWNLOAD_END, "Assembling image...", None)
                    .await;
                self.assemble_rgb(&plan, downloaded).await?
            }
        };

        self.publish(JobStatus::Processing, VERIFY_PROGRESS, "Verifying output...", None)
            .await;
        let verified = self.verify().await?;

        let file_size = FileSize::from_bytes(verified.file_size);
        let total = plan.chunk_count();
        let elapsed = self.started.elapsed();
        self.reporter.info(&format!(
            "[COMPLETED] {} x {} px, {}/{} chunks, {}, {:.2} seconds",
            verified.width,
            verified.height,
            assembled.chunks_used,
            total,
            file_size.formatted,
            elapsed.as_secs_f64()
        ));
        self.publish(
            JobStatus::Complete,
            100.0,
            format!("DEM download complete ({}/{} chunks)", assembled.chunks_used, total),
            Some(file_size.clone()),
        )
        .await;

        Ok(JobSummary {
            job_id: self.job_id,
            output_path: job.output_path.clone(),
            chunks_total: total,
            chunks_used: assembled.chunks_used,
            width: verified.width,
            height: verified.height,
            file_size,
            elapsed,
        })
    }

    /// Fetch every chunk on a bounded pool, publishing as each one lands.
    async fn download(&mut self, plan: &ChunkPlan) -> Result<Survivors> {
        let chunks = plan.chunks();
        let total = chunks.len();
        self.publish(
            JobStatus::Downloading,
            DOWNLOAD_START,
            format!("Fetching {} chunk(s)...", total),
            None,
        )
        .await;

        let orchestrator = self.orchestrator;
        let service = orchestrator.service.as_ref();
        let job = self.job;
        let url = job.service_url.as_str();
        let variant = job.variant;
        let scratch = self.scratch.clone();
        let scratch = scratch.as_path();
        let concurrency = self.config().max_concurrent_fetches.max(1);

        let mut fetches = stream::iter(chunks)
            .map(|chunk| async move {
                let result = service.fetch_chunk(url, &chunk, variant, scratch).await;
                (chunk, result)
            })
            .buffer_unordered(concurrency);

        let mut survivors = Survivors {
            total,
            failed: 0,
            ok: Vec::with_capacity(total),
        };
        let mut done = 0;
        while let Some((chunk, result)) = fetches.next().await {
            done += 1;
            match result {
                Ok(path) => survivors.ok.push((chunk, path)),
                Err(e) => {
                    survivors.failed += 1;
                    self.reporter
                        .warn(&format!("Chunk {},{} failed: {}", chunk.row, chunk.col, e));
                }
            }
            self.publish(
                JobStatus::Downloading,
                stage_progress(DOWNLOAD_START, DOWNLOAD_END, done, total),
                format!("Downloaded {}/{} chunks", done, total),
                None,
            )
            .await;
        }
        drop(fetches);
        // Completion order is arbitrary; later stages expect grid order
        survivors.ok.sort_by_key(|(c, _)| (c.row, c.col));

        self.reporter.info(&format!(
            "Download finished: {}/{} chunks succeeded",
            survivors.ok.len(),
            total
        ));
        check_failure_budget(Stage::Download, survivors.failed, total, self.config().max_failed_fraction)?;
        if survivors.failed > 0 {
            self.reporter.warn(&format!(
                "Continuing with {} of {} chunks",
                survivors.ok.len(),
                total
            ));
        }
        Ok(survivors)
    }

    /// Stamp each downloaded RAW chunk with its bbox.
    async fn georeference(&mut self, downloaded: Survivors) -> Result<Survivors> {
        let Survivors { total, failed, ok } = downloaded;
        self.publish(JobStatus::Processing, DOWNLOAD_END, "Georeferencing chunks...", None)
            .await;

        let n = ok.len();
        let mut survivors = Survivors {
            total,
            failed,
            ok: Vec::with_capacity(n),
        };
        for (i, (chunk, path)) in ok.into_iter().enumerate() {
            let bbox = chunk.bbox;
            let source = path.clone();
            let stamped = tokio::task::spawn_blocking(move || stamp(&source, &bbox))
                .await
                .map_err(|e| JobError::Worker(e.to_string()))?;

            match stamped {
                Ok(georef) => survivors.ok.push((chunk, georef)),
                Err(e) => {
                    survivors.failed += 1;
                    self.reporter.warn(&format!(
                        "Georeferencing chunk {},{} failed: {}",
                        chunk.row, chunk.col, e
                    ));
                }
            }
            self.publish(
                JobStatus::Processing,
                stage_progress(DOWNLOAD_END, GEOREF_END, i + 1, n),
                format!("Georeferenced {}/{} chunks", i + 1, n),
                None,
            )
            .await;
        }

        check_failure_budget(Stage::Georeference, survivors.failed, total, self.config().max_failed_fraction)?;
        Ok(survivors)
    }

    async fn ensure_output_dir(&self) -> Result<()> {
        if let Some(parent) = self.job.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn assemble_raw(&mut self, plan: &ChunkPlan, georeferenced: Survivors) -> Result<Assembled> {
        self.ensure_output_dir().await?;
        let output = self.job.output_path.clone();

        if plan.is_single_chunk() {
            let (_, path) = georeferenced
                .ok
                .into_iter()
                .next()
                .ok_or(JobError::NoUsableChunks(Stage::Merge))?;
            self.reporter.info("Single chunk, skipping merge");
            tokio::fs::copy(&path, &output).await?;
            return Ok(Assembled { chunks_used: 1 });
        }

        self.publish(
            JobStatus::Processing,
            MERGE_PROGRESS,
            format!("Merging {} chunks...", georeferenced.ok.len()),
            None,
        )
        .await;

        let Survivors { total, failed, ok } = georeferenced;
        let inputs: Vec<PathBuf> = ok.into_iter().map(|(_, p)| p).collect();
        let target = output.clone();
        let mosaic = tokio::task::spawn_blocking(move || merge(&inputs, &target))
            .await
            .map_err(|e| JobError::Worker(e.to_string()))?
            .map_err(|e| JobError::raster(Stage::Merge, e))?;

        if mosaic.inputs_skipped > 0 {
            self.reporter
                .warn(&format!("Merge skipped {} incompatible chunk(s)", mosaic.inputs_skipped));
            self.enforce_merge_budget(&output, failed + mosaic.inputs_skipped, total)
                .await?;
        }
        self.reporter.info(&format!(
            "Merged {} chunks into {}x{} px, bounds {}",
            mosaic.inputs_used, mosaic.width, mosaic.height, mosaic.bounds
        ));
        Ok(Assembled {
            chunks_used: mosaic.inputs_used,
        })
    }

    /// Re-check the failure budget with chunks the merge dropped, removing
    /// the output when it no longer qualifies.
    async fn enforce_merge_budget(&self, output: &Path, failed: usize, total: usize) -> Result<()> {
        let checked = check_failure_budget(Stage::Merge, failed, total, self.config().max_failed_fraction);
        if checked.is_err() {
            for path in [output.to_path_buf(), world_file_path(output), info_file_path(output)] {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove rejected output"),
                }
            }
        }
        checked
    }

    async fn assemble_rgb(&mut self, plan: &ChunkPlan, downloaded: Survivors) -> Result<Assembled> {
        self.ensure_output_dir().await?;
        let output = self.job.output_path.clone();
        let source = self.job.source_name.clone();

        if plan.is_single_chunk() {
            let (chunk, path) = downloaded
                .ok
                .into_iter()
                .next()
                .ok_or(JobError::NoUsableChunks(Stage::Merge))?;
            let bbox = chunk.bbox;
            tokio::task::spawn_blocking(move || promote_rgb(&path, &bbox, &source, &output))
                .await
                .map_err(|e| JobError::Worker(e.to_string()))?
                .map_err(|e| JobError::raster(Stage::Merge, e))?;
            return Ok(Assembled { chunks_used: 1 });
        }

        self.publish(
            JobStatus::Processing,
            MERGE_PROGRESS,
            format!("Stitching {} image chunks...", downloaded.ok.len()),
            None,
        )
        .await;

        let tiles: Vec<StitchTile> = downloaded
            .ok
            .into_iter()
            .map(|(chunk, path)| StitchTile {
                row: chunk.row,
                col: chunk.col,
                path,
            })
            .collect();
        let layout = StitchLayout {
            rows: plan.grid_size,
            cols: plan.grid_size,
            tile_width: plan.chunk_width,
            tile_height: plan.chunk_height,
            bbox: plan.bbox,
        };

        let target = output.clone();
        let stitched = tokio::task::spawn_blocking(move || stitch_rgb(&tiles, &layout, &source, &target))
            .await
            .map_err(|e| JobError::Worker(e.to_string()))?
            .map_err(|e| JobError::raster(Stage::Merge, e))?;

        if stitched.tiles_skipped > 0 {
            self.reporter
                .warn(&format!("Stitch skipped {} unreadable tile(s)", stitched.tiles_skipped));
            self.enforce_merge_budget(&output, downloaded.failed + stitched.tiles_skipped, downloaded.total)
                .await?;
        }

        self.reporter.info(&format!(
            "Stitched {} tiles into {}x{} px",
            stitched.tiles_placed, stitched.width, stitched.height
        ));
        Ok(Assembled {
            chunks_used: stitched.tiles_placed,
        })
    }

    async fn verify(&self) -> Result<VerifiedOutput> {
        let output = self.job.output_path.clone();
        let requested = self.job.bbox;
        let variant = self.job.variant;
        // Edge chunks may be lost within the failure budget
        let min_coverage = 1.0 - self.config().max_failed_fraction;
        tokio::task::spawn_blocking(move || match variant {
            DataVariant::Raw => verify_geotiff(&output, &requested, min_coverage),
            DataVariant::Rgb => verify_png(&output, &requested, min_coverage),
        })
        .await
        .map_err(|e| JobError::Worker(e.to_string()))?
        .map_err(|e| JobError::raster(Stage::Verify, e))
    }
}

/// Scratch directory a job uses under `scratch_root`.
pub fn scratch_dir_for(scratch_root: &Path, job_id: Uuid) -> PathBuf {
    scratch_root.join(job_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_is_monotonic() {
        let mut t = ProgressTracker::default();
        assert_eq!(t.advance(JobStatus::Downloading, 20.0), Some((JobStatus::Downloading, 20.0)));
        // Out-of-order completion report does not lower progress
        assert_eq!(t.advance(JobStatus::Downloading, 10.0), Some((JobStatus::Downloading, 20.0)));
        assert_eq!(t.advance(JobStatus::Processing, 150.0), Some((JobStatus::Processing, 100.0)));
    }

    #[test]
    fn test_tracker_drops_illegal_moves() {
        let mut t = ProgressTracker::default();
        assert!(t.advance(JobStatus::Complete, 100.0).is_none());
        assert_eq!(t.status(), JobStatus::Starting);

        t.advance(JobStatus::Failed, 0.0).unwrap();
        assert!(t.advance(JobStatus::Downloading, 5.0).is_none());
        assert_eq!(t.status(), JobStatus::Failed);
    }

    #[test]
    fn test_failure_budget() {
        assert!(check_failure_budget(Stage::Download, 0, 4, 0.25).is_ok());
        assert!(check_failure_budget(Stage::Download, 1, 4, 0.25).is_ok());
        assert!(matches!(
            check_failure_budget(Stage::Download, 2, 4, 0.25),
            Err(JobError::TooManyFailures { failed: 2, total: 4, .. })
        ));
        assert!(matches!(
            check_failure_budget(Stage::Download, 1, 4, 0.0),
            Err(JobError::TooManyFailures { .. })
        ));
        assert!(matches!(
            check_failure_budget(Stage::Georeference, 4, 4, 1.0),
            Err(JobError::NoUsableChunks(Stage::Georeference))
        ));
    }

    #[test]
    fn test_stage_progress() {
        assert_eq!(stage_progress(5.0, 50.0, 0, 4), 5.0);
        assert_eq!(stage_progress(5.0, 50.0, 4, 4), 50.0);
        assert_eq!(stage_progress(50.0, 80.0, 1, 2), 65.0);
        assert_eq!(stage_progress(50.0, 80.0, 0, 0), 80.0);
    }
}
