//! Mock ArcGIS-style export service for fetcher and end-to-end tests.
//!
//! Serves `GET /info` and `GET /exportImage` on `127.0.0.1:<ephemeral>`.
//! Responses to `/exportImage` honour the requested `size=W,H` so the
//! payload matches what the planner asked for.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::task::JoinHandle;

use crate::generators::{create_constant_grid, encode_f32_tiff, encode_png};

/// How the mock responds to export requests.
#[derive(Debug, Clone)]
pub enum UpstreamBehavior {
    /// Float TIFF of the requested size filled with `value`.
    Elevation { value: f32 },
    /// Opaque PNG of the requested size.
    Image { color: [u8; 4] },
    /// Always answer with this status code.
    Status(u16),
    /// 200 with an HTML error page.
    HtmlError,
    /// Fail with 503 for the first `failures` exports, then serve elevation.
    FlakyElevation { failures: usize, value: f32 },
    /// Fail every export whose bbox starts at `min_lon`, serve elevation otherwise.
    FailWest { min_lon: f64, value: f32 },
}

struct MockState {
    behavior: UpstreamBehavior,
    info_status: StatusCode,
    export_hits: AtomicUsize,
    info_hits: AtomicUsize,
}

/// A running mock service. Aborted on drop.
pub struct MockUpstream {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockUpstream {
    /// Start a mock whose `/info` probe succeeds.
    pub async fn start(behavior: UpstreamBehavior) -> Self {
        Self::start_with_info(behavior, StatusCode::OK).await
    }

    /// Start a mock with a specific `/info` status.
    pub async fn start_with_info(behavior: UpstreamBehavior, info_status: StatusCode) -> Self {
        let state = Arc::new(MockState {
            behavior,
            info_status,
            export_hits: AtomicUsize::new(0),
            info_hits: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/info", get(info))
            .route("/exportImage", get(export_image))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, handle }
    }

    /// Base URL to hand to the fetcher (no trailing slash).
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn export_hits(&self) -> usize {
        self.state.export_hits.load(Ordering::SeqCst)
    }

    pub fn info_hits(&self) -> usize {
        self.state.info_hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn info(State(state): State<Arc<MockState>>) -> Response {
    state.info_hits.fetch_add(1, Ordering::SeqCst);
    (
        state.info_status,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"currentVersion": 10.91, "serviceDescription": "mock"}"#,
    )
        .into_response()
}

fn requested_size(params: &HashMap<String, String>) -> (u32, u32) {
    params
        .get("size")
        .and_then(|s| {
            let (w, h) = s.split_once(',')?;
            Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
        })
        .unwrap_or((64, 64))
}

fn requested_min_lon(params: &HashMap<String, String>) -> Option<f64> {
    params.get("bbox")?.split(',').next()?.trim().parse().ok()
}

fn tiff_response(width: u32, height: u32, value: f32) -> Response {
    let grid = create_constant_grid(width as usize, height as usize, value);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/tiff")],
        encode_f32_tiff(width, height, &grid),
    )
        .into_response()
}

async fn export_image(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let hit = state.export_hits.fetch_add(1, Ordering::SeqCst);
    let (width, height) = requested_size(&params);

    match &state.behavior {
        UpstreamBehavior::Elevation { value } => tiff_response(width, height, *value),
        UpstreamBehavior::Image { color } => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/png")],
            encode_png(width, height, *color),
        )
            .into_response(),
        UpstreamBehavior::Status(code) => {
            let status = StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "upstream failure").into_response()
        }
        UpstreamBehavior::HtmlError => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html")],
            "<html><body>Error: export failed</body></html>",
        )
            .into_response(),
        UpstreamBehavior::FlakyElevation { failures, value } => {
            if hit < *failures {
                (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response()
            } else {
                tiff_response(width, height, *value)
            }
        }
        UpstreamBehavior::FailWest { min_lon, value } => {
            let west = requested_min_lon(&params).map_or(false, |lon| (lon - min_lon).abs() < 1e-9);
            if west {
                (StatusCode::INTERNAL_SERVER_ERROR, "chunk failure").into_response()
            } else {
                tiff_response(width, height, *value)
            }
        }
    }
}
