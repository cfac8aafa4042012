//! Chunk requests against an ArcGIS-style `exportImage` endpoint.
//!
//! Each chunk is streamed straight to a scratch file and then sanity-checked:
//! services under load answer 200 with an HTML or JSON error page, which
//! must not reach the georeferencer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dem_common::DataVariant;
use futures::StreamExt;
use reqwest::{header, Client};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::FetchError;
use crate::planner::ChunkRequest;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Bytes of the body kept in memory for error-page detection.
const SAMPLE_BYTES: usize = 1024;

/// Upstream elevation service as seen by the orchestrator.
#[async_trait]
pub trait ElevationService: Send + Sync {
    /// Check the service answers before any chunk work starts.
    async fn probe(&self, service_url: &str) -> Result<(), FetchError>;

    /// Fetch one chunk into `dest_dir`, returning the payload path.
    async fn fetch_chunk(
        &self,
        service_url: &str,
        chunk: &ChunkRequest,
        variant: DataVariant,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError>;
}

/// Query parameters for one export request.
pub fn export_params(chunk: &ChunkRequest, variant: DataVariant) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("bbox", chunk.bbox.to_query_string()),
        ("bboxSR", "4326".to_string()),
        ("imageSR", "4326".to_string()),
        ("size", format!("{},{}", chunk.width_px, chunk.height_px)),
        ("f", "image".to_string()),
    ];
    match variant {
        DataVariant::Raw => params.extend([
            ("format", "tiff".to_string()),
            ("pixelType", "F32".to_string()),
            ("interpolation", "RSP_BilinearInterpolation".to_string()),
            ("noDataInterpretation", "esriNoDataMatchAny".to_string()),
            ("transparent", "false".to_string()),
        ]),
        DataVariant::Rgb => params.extend([
            ("format", "png".to_string()),
            ("pixelType", "U8".to_string()),
            ("transparent", "true".to_string()),
        ]),
    }
    params
}

/// True when a body sample looks like an error document rather than raster bytes.
pub fn looks_like_error_page(sample: &[u8]) -> bool {
    let text = String::from_utf8_lossy(sample);
    let head = text.trim_start().to_lowercase();
    head.starts_with("<html") || head.starts_with("<!doctype html") || head.starts_with('{') || head.starts_with("<?xml")
}

fn mentions_error(sample: &[u8]) -> bool {
    let text = String::from_utf8_lossy(sample).to_lowercase();
    text.contains("error") || text.contains("exception")
}

/// Content and size checks on a downloaded payload.
///
/// Returns `Err(Malformed)` only when the payload is clearly an error body;
/// odd but plausible payloads are accepted with a warning.
pub fn validate_payload(
    content_type: &str,
    size: u64,
    sample: &[u8],
    min_payload_bytes: u64,
) -> Result<(), FetchError> {
    let ct = content_type.to_lowercase();
    if !ct.contains("image") && !ct.contains("tiff") {
        if looks_like_error_page(sample) {
            return Err(FetchError::malformed(format!(
                "content-type '{}' with error body: {}",
                content_type,
                String::from_utf8_lossy(&sample[..sample.len().min(200)])
            )));
        }
        warn!(content_type = %content_type, "Unexpected content type, accepting payload");
    }

    if size < min_payload_bytes {
        if mentions_error(sample) {
            return Err(FetchError::malformed(format!(
                "{} byte payload reads as an error: {}",
                size,
                String::from_utf8_lossy(&sample[..sample.len().min(200)])
            )));
        }
        warn!(size, min_payload_bytes, "Small payload, accepting");
    }
    Ok(())
}

/// reqwest-backed [`ElevationService`].
pub struct HttpChunkFetcher {
    client: Client,
    policy: RetryPolicy,
    probe_timeout: Duration,
    min_payload_bytes: u64,
}

impl HttpChunkFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_concurrent_fetches)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            policy: config.retry_policy(),
            probe_timeout: config.probe_timeout,
            min_payload_bytes: config.min_payload_bytes,
        })
    }

    async fn probe_once(&self, url: &str) -> Result<(), FetchError> {
        let response = self
            .client
            .get(url)
            .query(&[("f", "json")])
            .timeout(self.probe_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncated_body(response).await,
            });
        }
        Ok(())
    }

    async fn fetch_once(
        &self,
        url: &str,
        params: &[(&'static str, String)],
        dest: &Path,
    ) -> Result<u64, FetchError> {
        let response = self.client.get(url).query(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncated_body(response).await,
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut file = fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut sample = Vec::with_capacity(SAMPLE_BYTES);
        let mut size = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if sample.len() < SAMPLE_BYTES {
                let take = (SAMPLE_BYTES - sample.len()).min(chunk.len());
                sample.extend_from_slice(&chunk[..take]);
            }
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if let Err(e) = validate_payload(&content_type, size, &sample, self.min_payload_bytes) {
            fs::remove_file(dest).await.ok();
            return Err(e);
        }
        Ok(size)
    }
}

async fn truncated_body(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    text.chars().take(200).collect()
}

#[async_trait]
impl ElevationService for HttpChunkFetcher {
    #[instrument(skip(self))]
    async fn probe(&self, service_url: &str) -> Result<(), FetchError> {
        let url = format!("{}/info", service_url.trim_end_matches('/'));
        retry_with_backoff(&self.policy, "probe", FetchError::is_retryable, |_| self.probe_once(&url))
            .await
            .map_err(FetchError::from_retry)
    }

    #[instrument(skip(self, chunk, dest_dir), fields(row = chunk.row, col = chunk.col))]
    async fn fetch_chunk(
        &self,
        service_url: &str,
        chunk: &ChunkRequest,
        variant: DataVariant,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        let url = format!("{}/exportImage", service_url.trim_end_matches('/'));
        let params = export_params(chunk, variant);
        let dest = dest_dir.join(chunk.file_name(variant.extension()));

        let result = retry_with_backoff(&self.policy, "export", FetchError::is_retryable, |_| {
            self.fetch_once(&url, &params, &dest)
        })
        .await;

        match result {
            Ok(bytes) => {
                metrics::counter!("dem_chunks_fetched_total").increment(1);
                metrics::counter!("dem_bytes_downloaded_total").increment(bytes);
                debug!(bytes, path = %dest.display(), "Chunk downloaded");
                Ok(dest)
            }
            Err(e) => {
                metrics::counter!("dem_chunk_fetch_failures_total").increment(1);
                Err(FetchError::from_retry(e))
            }
        }
    }
}
