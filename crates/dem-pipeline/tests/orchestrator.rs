//! End-to-end job runs against an in-process elevation service.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dem_common::{BoundingBox, DataVariant};
use dem_pipeline::lock::FileLock;
use dem_pipeline::outputs::status_path_for;
use dem_pipeline::status::StatusMutator;
use dem_pipeline::{
    ChunkRequest, ElevationService, FetchError, FileStatusStore, JobError, JobSpec, JobStatus, Orchestrator,
    PipelineConfig, StatusError, StatusRecord, StatusStore, TracingReporter,
};
use dem_raster::{read_geotiff, DEFAULT_NODATA};
use test_utils::{create_constant_grid, encode_f32_tiff, encode_png};
use uuid::Uuid;

/// Serves constant chunks; `(row, col)` in `fail` always errors and cells in
/// `oversized` come back at twice the requested size.
struct FakeService {
    probe_ok: bool,
    fail: Vec<(u32, u32)>,
    oversized: Vec<(u32, u32)>,
    fetches: AtomicUsize,
}

impl FakeService {
    fn healthy() -> Self {
        Self {
            probe_ok: true,
            fail: Vec::new(),
            oversized: Vec::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    fn failing(cells: &[(u32, u32)]) -> Self {
        Self {
            fail: cells.to_vec(),
            ..Self::healthy()
        }
    }

    fn oversizing(cells: &[(u32, u32)]) -> Self {
        Self {
            oversized: cells.to_vec(),
            ..Self::healthy()
        }
    }

    /// Elevation written for a chunk, distinct per cell.
    fn value_for(row: u32, col: u32) -> f32 {
        100.0 + row as f32 * 10.0 + col as f32
    }
}

#[async_trait]
impl ElevationService for FakeService {
    async fn probe(&self, _service_url: &str) -> Result<(), FetchError> {
        if self.probe_ok {
            Ok(())
        } else {
            Err(FetchError::Status {
                status: 503,
                body: "maintenance".into(),
            })
        }
    }

    async fn fetch_chunk(
        &self,
        _service_url: &str,
        chunk: &ChunkRequest,
        variant: DataVariant,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.contains(&(chunk.row, chunk.col)) {
            return Err(FetchError::Status {
                status: 500,
                body: "chunk failure".into(),
            });
        }

        let (w, h) = if self.oversized.contains(&(chunk.row, chunk.col)) {
            (chunk.width_px * 2, chunk.height_px * 2)
        } else {
            (chunk.width_px, chunk.height_px)
        };
        let bytes = match variant {
            DataVariant::Raw => {
                let grid = create_constant_grid(w as usize, h as usize, Self::value_for(chunk.row, chunk.col));
                encode_f32_tiff(w, h, &grid)
            }
            DataVariant::Rgb => encode_png(w, h, [chunk.row as u8 * 100, chunk.col as u8 * 100, 50, 255]),
        };
        let path = dest_dir.join(chunk.file_name(variant.extension()));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// File store that keeps every record it writes.
struct RecordingStore {
    inner: FileStatusStore,
    history: Mutex<Vec<StatusRecord>>,
}

impl RecordingStore {
    fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: FileStatusStore::new(lock_timeout),
            history: Mutex::new(Vec::new()),
        }
    }

    fn history(&self) -> Vec<StatusRecord> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusStore for RecordingStore {
    async fn read(&self, path: &Path) -> StatusRecord {
        self.inner.read(path).await
    }

    async fn create(&self, path: &Path, record: StatusRecord) -> Result<(), StatusError> {
        self.history.lock().unwrap().push(record.clone());
        self.inner.create(path, record).await
    }

    async fn update(&self, path: &Path, mutate: StatusMutator) -> Result<StatusRecord, StatusError> {
        let record = self.inner.update(path, mutate).await?;
        self.history.lock().unwrap().push(record.clone());
        Ok(record)
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    out_dir: PathBuf,
    config: PipelineConfig,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        let config = PipelineConfig {
            // 0.02 degrees at 30 m is 74 px per side: a 2x2 grid of 37 px chunks
            max_request_px: 40,
            scratch_dir: dir.path().join("scratch"),
            status_lock_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        Self {
            _dir: dir,
            out_dir,
            config,
        }
    }

    fn job(&self, variant: DataVariant, bbox: BoundingBox) -> JobSpec {
        let output_path = self.out_dir.join(format!("job.{}", variant.extension()));
        JobSpec {
            bbox,
            resolution_m: 30.0,
            variant,
            status_path: status_path_for(&output_path),
            output_path,
            display_name: "Test area (Fake DEM)".into(),
            service_url: "http://fake.invalid".into(),
            source_name: "Fake DEM".into(),
        }
    }

    async fn run(
        &self,
        config: PipelineConfig,
        service: Arc<FakeService>,
        store: Arc<RecordingStore>,
        job: &JobSpec,
    ) -> (Uuid, Result<dem_pipeline::JobSummary, JobError>) {
        tokio::fs::create_dir_all(&self.out_dir).await.unwrap();
        store
            .create(&job.status_path, StatusRecord::starting(job.display_name.clone(), job.variant))
            .await
            .unwrap();

        let orchestrator = Orchestrator::new(config, service, store);
        let job_id = Uuid::new_v4();
        let result = orchestrator.run(job_id, job, &TracingReporter::new(job_id)).await;
        (job_id, result)
    }
}

fn grid_bbox() -> BoundingBox {
    BoundingBox::new(153.0, -27.02, 153.02, -27.0).unwrap()
}

fn assert_monotonic(history: &[StatusRecord]) {
    let order = |s: JobStatus| match s {
        JobStatus::Starting => 0,
        JobStatus::Downloading => 1,
        JobStatus::Processing => 2,
        JobStatus::Complete | JobStatus::Failed => 3,
        JobStatus::Unknown => panic!("unknown status written"),
    };
    for pair in history.windows(2) {
        assert!(order(pair[0].status) <= order(pair[1].status), "{:?} -> {:?}", pair[0].status, pair[1].status);
        assert!(pair[0].progress <= pair[1].progress, "{} -> {}", pair[0].progress, pair[1].progress);
    }
}

#[tokio::test]
async fn test_raw_grid_completes_with_monotonic_status() {
    let h = Harness::new();
    let service = Arc::new(FakeService::healthy());
    let store = Arc::new(RecordingStore::new(h.config.status_lock_timeout));
    let job = h.job(DataVariant::Raw, grid_bbox());

    let (job_id, result) = h.run(h.config.clone(), service.clone(), store.clone(), &job).await;
    let summary = result.unwrap();

    assert_eq!(summary.chunks_total, 4);
    assert_eq!(summary.chunks_used, 4);
    assert_eq!((summary.width, summary.height), (74, 74));
    assert_eq!(service.fetches.load(Ordering::SeqCst), 4);

    let history = store.history();
    assert_monotonic(&history);
    let seen: Vec<JobStatus> = history.iter().map(|r| r.status).collect();
    for status in [JobStatus::Starting, JobStatus::Downloading, JobStatus::Processing, JobStatus::Complete] {
        assert!(seen.contains(&status), "never saw {status}");
    }

    let last = store.read(&job.status_path).await;
    assert_eq!(last.status, JobStatus::Complete);
    assert_eq!(last.progress, 100.0);
    assert!(last.message.contains("4/4"));
    assert_eq!(last.display_name.as_deref(), Some("Test area (Fake DEM)"));
    assert_eq!(last.data_type, Some(DataVariant::Raw));
    assert_eq!(last.file_size.unwrap().bytes, summary.file_size.bytes);

    // Row 0 is south, so it lands in the bottom half of the image
    let raster = read_geotiff(&job.output_path).unwrap();
    assert_eq!(raster.value_at(10, 60, 0), Some(FakeService::value_for(0, 0) as f64));
    assert_eq!(raster.value_at(60, 60, 0), Some(FakeService::value_for(0, 1) as f64));
    assert_eq!(raster.value_at(10, 10, 0), Some(FakeService::value_for(1, 0) as f64));
    assert_eq!(raster.value_at(60, 10, 0), Some(FakeService::value_for(1, 1) as f64));

    assert!(!h.config.scratch_dir.join(job_id.to_string()).exists());
}

#[tokio::test]
async fn test_one_failed_chunk_is_tolerated_by_default() {
    let h = Harness::new();
    let service = Arc::new(FakeService::failing(&[(1, 0)]));
    let store = Arc::new(RecordingStore::new(h.config.status_lock_timeout));
    let job = h.job(DataVariant::Raw, grid_bbox());

    let (_, result) = h.run(h.config.clone(), service, store.clone(), &job).await;
    let summary = result.unwrap();
    assert_eq!(summary.chunks_used, 3);

    let last = store.read(&job.status_path).await;
    assert_eq!(last.status, JobStatus::Complete);
    assert!(last.message.contains("3/4"), "{}", last.message);

    // The north-west quadrant was never written
    let raster = read_geotiff(&job.output_path).unwrap();
    assert_eq!(raster.value_at(10, 10, 0), Some(DEFAULT_NODATA));
    assert_eq!(raster.value_at(60, 60, 0), Some(FakeService::value_for(0, 1) as f64));
}

#[tokio::test]
async fn test_one_failed_chunk_fails_strict_policy() {
    let h = Harness::new();
    let config = PipelineConfig {
        max_failed_fraction: 0.0,
        ..h.config.clone()
    };
    let service = Arc::new(FakeService::failing(&[(1, 0)]));
    let store = Arc::new(RecordingStore::new(h.config.status_lock_timeout));
    let job = h.job(DataVariant::Raw, grid_bbox());

    let (job_id, result) = h.run(config, service, store.clone(), &job).await;
    assert!(matches!(
        result,
        Err(JobError::TooManyFailures { failed: 1, total: 4, .. })
    ));

    let last = store.read(&job.status_path).await;
    assert_eq!(last.status, JobStatus::Failed);
    assert!(last.message.starts_with("Error:"));
    assert_monotonic(&store.history());
    assert!(!job.output_path.exists());
    // Scratch is left for inspection
    assert!(h.config.scratch_dir.join(job_id.to_string()).exists());
}

#[tokio::test]
async fn test_chunk_dropped_by_merge_counts_against_policy() {
    let h = Harness::new();
    // (0, 0) merges first and sets the reference resolution, so the three
    // correctly sized chunks are the ones dropped
    let service = Arc::new(FakeService::oversizing(&[(0, 0)]));
    let store = Arc::new(RecordingStore::new(h.config.status_lock_timeout));
    let job = h.job(DataVariant::Raw, grid_bbox());

    let (_, result) = h.run(h.config.clone(), service, store.clone(), &job).await;
    assert!(
        matches!(result, Err(JobError::TooManyFailures { failed: 3, total: 4, .. })),
        "{result:?}"
    );

    let last = store.read(&job.status_path).await;
    assert_eq!(last.status, JobStatus::Failed);
    assert!(!job.output_path.exists());
    assert_monotonic(&store.history());
}

#[tokio::test]
async fn test_single_chunk_dropped_by_merge_is_tolerated() {
    let h = Harness::new();
    let service = Arc::new(FakeService::oversizing(&[(1, 1)]));
    let store = Arc::new(RecordingStore::new(h.config.status_lock_timeout));
    let job = h.job(DataVariant::Raw, grid_bbox());

    let (_, result) = h.run(h.config.clone(), service, store.clone(), &job).await;
    let summary = result.unwrap();
    assert_eq!(summary.chunks_used, 3);

    let last = store.read(&job.status_path).await;
    assert_eq!(last.status, JobStatus::Complete);
    assert!(last.message.contains("3/4"), "{}", last.message);
}

#[tokio::test]
async fn test_probe_failure_fails_before_fetching() {
    let h = Harness::new();
    let service = Arc::new(FakeService {
        probe_ok: false,
        ..FakeService::healthy()
    });
    let store = Arc::new(RecordingStore::new(h.config.status_lock_timeout));
    let job = h.job(DataVariant::Raw, grid_bbox());

    let (_, result) = h.run(h.config.clone(), service.clone(), store.clone(), &job).await;
    assert!(matches!(result, Err(JobError::ServiceUnavailable(_))));
    assert_eq!(service.fetches.load(Ordering::SeqCst), 0);

    let statuses: Vec<JobStatus> = store.history().iter().map(|r| r.status).collect();
    assert!(!statuses.contains(&JobStatus::Downloading));
    assert_eq!(store.read(&job.status_path).await.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_single_chunk_skips_merge() {
    let h = Harness::new();
    let config = PipelineConfig {
        max_request_px: 4000,
        ..h.config.clone()
    };
    let service = Arc::new(FakeService::healthy());
    let store = Arc::new(RecordingStore::new(h.config.status_lock_timeout));
    let job = h.job(DataVariant::Raw, grid_bbox());

    let (_, result) = h.run(config, service.clone(), store.clone(), &job).await;
    let summary = result.unwrap();
    assert_eq!(summary.chunks_total, 1);
    assert_eq!(service.fetches.load(Ordering::SeqCst), 1);
    assert!(store.history().iter().all(|r| !r.message.starts_with("Merging")));

    let raster = read_geotiff(&job.output_path).unwrap();
    assert_eq!(raster.info.crs, Some(dem_common::CrsCode::Epsg4326));
    assert_eq!(raster.value_at(5, 5, 0), Some(FakeService::value_for(0, 0) as f64));
}

#[tokio::test]
async fn test_rgb_grid_is_stitched() {
    let h = Harness::new();
    let service = Arc::new(FakeService::healthy());
    let store = Arc::new(RecordingStore::new(h.config.status_lock_timeout));
    let job = h.job(DataVariant::Rgb, grid_bbox());

    let (_, result) = h.run(h.config.clone(), service, store.clone(), &job).await;
    let summary = result.unwrap();
    assert_eq!(summary.chunks_used, 4);

    let img = image::open(&job.output_path).unwrap().to_rgba8();
    assert_eq!(img.dimensions(), (74, 74));
    // North-east chunk (row 1, col 1) sits top-right
    assert_eq!(img.get_pixel(60, 10).0, [100, 100, 50, 255]);
    // South-west chunk (row 0, col 0) sits bottom-left
    assert_eq!(img.get_pixel(10, 60).0, [0, 0, 50, 255]);

    assert!(job.output_path.with_extension("pgw").exists());
    assert!(h.out_dir.join("job_info.json").exists());
    assert_eq!(store.read(&job.status_path).await.status, JobStatus::Complete);
}

#[tokio::test]
async fn test_status_lock_timeout_does_not_fail_job() {
    let h = Harness::new();
    let config = PipelineConfig {
        status_lock_timeout: Duration::from_millis(60),
        ..h.config.clone()
    };
    let service = Arc::new(FakeService::healthy());
    let store = Arc::new(RecordingStore::new(config.status_lock_timeout));
    let job = h.job(DataVariant::Raw, grid_bbox());

    tokio::fs::create_dir_all(&h.out_dir).await.unwrap();
    store
        .create(&job.status_path, StatusRecord::starting("held", DataVariant::Raw))
        .await
        .unwrap();

    // Another process holds the record for the whole run
    let _held = FileLock::acquire(&job.status_path, Duration::from_secs(1)).await.unwrap();

    let orchestrator = Orchestrator::new(config, service, store.clone());
    let job_id = Uuid::new_v4();
    let summary = orchestrator
        .run(job_id, &job, &TracingReporter::new(job_id))
        .await
        .unwrap();

    assert!(summary.output_path.exists());
    assert_eq!(store.read(&job.status_path).await.status, JobStatus::Starting);
}
