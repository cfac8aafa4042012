//! Subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use dem_common::{BoundingBox, DataVariant, DemCatalog};
use dem_pipeline::outputs::{delete_outputs, describe, rename};
use dem_pipeline::{
    plan, Dispatcher, FileStatusStore, HttpChunkFetcher, JobSpec, JobStatus, Orchestrator, PipelineConfig,
};
use serde::Serialize;
use tracing::{error, info};

/// Inputs of the `fetch` subcommand.
#[derive(Debug)]
pub struct FetchRequest {
    pub source: String,
    pub bbox: BoundingBox,
    pub resolution_m: Option<f64>,
    pub variant: DataVariant,
    pub name: Option<String>,
    pub output_dir: PathBuf,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Dispatch one job and wait for it to finish.
pub async fn fetch(catalog: &DemCatalog, config: PipelineConfig, request: FetchRequest) -> Result<()> {
    let source = catalog.require(&request.source)?;
    tokio::fs::create_dir_all(&request.output_dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", request.output_dir.display()))?;

    let job = JobSpec::for_source(
        source,
        request.bbox,
        request.resolution_m,
        request.variant,
        &request.output_dir,
        request.name.as_deref(),
    );

    let service = Arc::new(HttpChunkFetcher::new(&config).context("Failed to build HTTP client")?);
    let store = Arc::new(FileStatusStore::new(config.status_lock_timeout));
    let dispatcher = Dispatcher::new(Arc::new(Orchestrator::new(config, service, store)));

    let handle = dispatcher.dispatch(job).await?;
    info!(
        job_id = %handle.job_id,
        output = %handle.output_path.display(),
        status_file = %handle.status_path.display(),
        "Job dispatched"
    );

    match handle.wait().await {
        Ok(summary) => print_json(&summary),
        Err(e) => {
            error!(error = %e, "Job failed");
            bail!("DEM fetch failed: {}", e)
        }
    }
}

/// Print an output's status record.
pub async fn status(output: &Path, lock_timeout: std::time::Duration) -> Result<()> {
    let store = FileStatusStore::new(lock_timeout);
    let record = describe(&store, output).await;
    print_json(&record)?;
    if record.status == JobStatus::Unknown {
        bail!("No usable status record for {}", output.display());
    }
    Ok(())
}

/// Print the chunk grid a job would use, without fetching anything.
pub fn plan_only(
    catalog: &DemCatalog,
    source: Option<&str>,
    bbox: BoundingBox,
    resolution_m: Option<f64>,
    max_request_px: u32,
) -> Result<()> {
    let resolution_m = match (resolution_m, source) {
        (Some(r), _) => r,
        (None, Some(id)) => catalog.require(id)?.resolution_m,
        (None, None) => bail!("--resolution or --source is required"),
    };

    #[derive(Serialize)]
    struct PlanOutput {
        #[serde(flatten)]
        plan: dem_pipeline::ChunkPlan,
        resolution_m: f64,
        chunks: Vec<dem_pipeline::ChunkRequest>,
    }

    let plan = plan(&bbox, resolution_m, max_request_px)?;
    print_json(&PlanOutput {
        plan,
        resolution_m,
        chunks: plan.chunks(),
    })
}

/// List the configured sources.
pub fn sources(catalog: &DemCatalog) -> Result<()> {
    let sources: Vec<_> = catalog.iter().collect();
    print_json(&sources)
}

pub async fn rename_output(output: &Path, name: &str, lock_timeout: std::time::Duration) -> Result<()> {
    let store = FileStatusStore::new(lock_timeout);
    let record = rename(&store, output, name)
        .await
        .with_context(|| format!("Failed to rename {}", output.display()))?;
    print_json(&record)
}

pub async fn delete_output(output: &Path) -> Result<()> {
    let removed = delete_outputs(output)
        .await
        .with_context(|| format!("Failed to delete {}", output.display()))?;
    print_json(&removed)
}
