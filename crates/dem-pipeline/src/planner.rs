//! Split a bounding box into export requests the service will accept.
//!
//! Resolution is converted with a flat 111 km per degree on both axes.
//! Longitude compression away from the equator is ignored, so east-west
//! pixel sizes come out finer than requested at high latitudes.

use dem_common::{BoundingBox, METERS_PER_DEGREE};
use serde::Serialize;

use crate::error::JobError;

// Absorbs representation error such as 0.1 degrees stored as 0.0999...
const FLOOR_EPSILON: f64 = 1e-9;

/// Chunk grid for one job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChunkPlan {
    pub bbox: BoundingBox,
    /// Full-area pixel dimensions at the target resolution.
    pub required_width: u32,
    pub required_height: u32,
    /// Chunks per side. The grid is always square.
    pub grid_size: u32,
    pub chunk_width: u32,
    pub chunk_height: u32,
}

/// One export request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChunkRequest {
    /// 0 is the southern-most row.
    pub row: u32,
    /// 0 is the western-most column.
    pub col: u32,
    pub bbox: BoundingBox,
    pub width_px: u32,
    pub height_px: u32,
}

impl ChunkRequest {
    /// Scratch file name for this chunk's payload.
    pub fn file_name(&self, extension: &str) -> String {
        format!("chunk_{}_{}.{}", self.row, self.col, extension)
    }
}

fn pixels_for(span_deg: f64, resolution_m: f64) -> u32 {
    let px = (span_deg * METERS_PER_DEGREE / resolution_m + FLOOR_EPSILON).floor();
    (px.min(u32::MAX as f64) as u32).max(1)
}

/// Compute the chunk grid for `bbox` at `resolution_m` metres per pixel.
pub fn plan(bbox: &BoundingBox, resolution_m: f64, max_request_px: u32) -> Result<ChunkPlan, JobError> {
    if !resolution_m.is_finite() || resolution_m <= 0.0 {
        return Err(JobError::InvalidJob(format!(
            "resolution must be a positive number of metres, got {}",
            resolution_m
        )));
    }
    if max_request_px == 0 {
        return Err(JobError::InvalidJob("max_request_px must be > 0".to_string()));
    }
    bbox.validate()
        .map_err(|e| JobError::InvalidJob(e.to_string()))?;

    let required_width = pixels_for(bbox.width(), resolution_m);
    let required_height = pixels_for(bbox.height(), resolution_m);
    let largest = required_width.max(required_height);
    let grid_size = largest.div_ceil(max_request_px).max(1);

    let chunk_px = |required: u32| required.div_ceil(grid_size).clamp(1, max_request_px);

    Ok(ChunkPlan {
        bbox: *bbox,
        required_width,
        required_height,
        grid_size,
        chunk_width: chunk_px(required_width),
        chunk_height: chunk_px(required_height),
    })
}

impl ChunkPlan {
    pub fn chunk_count(&self) -> usize {
        (self.grid_size as usize).pow(2)
    }

    pub fn is_single_chunk(&self) -> bool {
        self.grid_size == 1
    }

    /// Edge `index` of `n` equal divisions of `[min, max]`. The last edge is
    /// `max` itself so the cells tile the range exactly.
    fn edge(min: f64, max: f64, index: u32, n: u32) -> f64 {
        if index >= n {
            max
        } else {
            min + index as f64 * (max - min) / n as f64
        }
    }

    /// All chunk requests, row-major from the south-west corner.
    pub fn chunks(&self) -> Vec<ChunkRequest> {
        let n = self.grid_size;
        let b = &self.bbox;
        let mut chunks = Vec::with_capacity(self.chunk_count());
        for row in 0..n {
            let south = Self::edge(b.min_lat, b.max_lat, row, n);
            let north = Self::edge(b.min_lat, b.max_lat, row + 1, n);
            for col in 0..n {
                let west = Self::edge(b.min_lon, b.max_lon, col, n);
                let east = Self::edge(b.min_lon, b.max_lon, col + 1, n);
                chunks.push(ChunkRequest {
                    row,
                    col,
                    bbox: BoundingBox {
                        min_lon: west,
                        min_lat: south,
                        max_lon: east,
                        max_lat: north,
                    },
                    width_px: self.chunk_width,
                    height_px: self.chunk_height,
                });
            }
        }
        chunks
    }
}
