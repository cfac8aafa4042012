//! Chunked DEM fetch pipeline.
//!
//! Large areas exceed what an ArcGIS `exportImage` endpoint will render in
//! one request. This crate splits the area into a square grid of requests,
//! fetches them concurrently with retry, georeferences and merges them, and
//! keeps a JSON status file up to date for pollers.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher::dispatch(JobSpec)
//!      │  writes `starting` record, spawns worker
//!      ▼
//! Orchestrator::run
//!      │
//!      ├─► ElevationService::probe
//!      ├─► planner::plan ──► ChunkRequest grid
//!      ├─► ElevationService::fetch_chunk  (bounded, retried)
//!      ├─► dem_raster::stamp               (RAW only)
//!      ├─► dem_raster::merge | stitch_rgb | single-chunk promote
//!      └─► dem_raster::verify_*
//!               │
//!               ▼
//!          StatusStore::update  ──►  <stem>_status.json
//! ```
//!
//! # Example
//!
//! ```ignore
//! let config = PipelineConfig::from_env();
//! let service = Arc::new(HttpChunkFetcher::new(&config)?);
//! let store = Arc::new(FileStatusStore::new(config.status_lock_timeout));
//! let dispatcher = Dispatcher::new(Arc::new(Orchestrator::new(config, service, store)));
//!
//! let handle = dispatcher.dispatch(job).await?;
//! let summary = handle.wait().await?;
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetcher;
pub mod job;
pub mod lock;
pub mod orchestrator;
pub mod outputs;
pub mod planner;
pub mod reporter;
pub mod retry;
pub mod status;

pub use config::PipelineConfig;
pub use dispatch::{Dispatcher, JobHandle};
pub use error::{DispatchError, FetchError, JobError, Result, Stage, StatusError};
pub use fetcher::{ElevationService, HttpChunkFetcher};
pub use job::JobSpec;
pub use orchestrator::{JobSummary, Orchestrator, ProgressTracker};
pub use planner::{plan, ChunkPlan, ChunkRequest};
pub use reporter::{JobLogReporter, StageReporter, TracingReporter};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy};
pub use status::{FileSize, FileStatusStore, JobStatus, StatusRecord, StatusStore};
