//! Final output verification.
//!
//! A job only reaches `complete` after its output reopens cleanly and its
//! bounds cover at least `min_coverage` of the area that was requested.

use std::path::Path;

use dem_common::BoundingBox;
use tracing::debug;

use crate::error::{RasterError, Result};
use crate::geotiff::{probe_geotiff, SampleType};
use crate::stitch::{read_world_file, world_file_path};

/// Summary of a verified output file.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedOutput {
    pub width: u32,
    pub height: u32,
    pub bands: u16,
    pub sample_type: Option<SampleType>,
    pub bounds: BoundingBox,
    pub file_size: u64,
}

/// Share of `requested` area that `bounds` covers, in `0.0..=1.0`.
pub fn coverage(bounds: &BoundingBox, requested: &BoundingBox) -> f64 {
    let area = requested.width() * requested.height();
    if area <= 0.0 {
        return 0.0;
    }
    bounds
        .intersection(requested)
        .map(|overlap| (overlap.width() * overlap.height() / area).min(1.0))
        .unwrap_or(0.0)
}

fn check_bounds(bounds: &BoundingBox, requested: &BoundingBox, min_coverage: f64) -> Result<()> {
    // Pixel snapping can push an edge a hair past +-180/+-90
    const EPS: f64 = 1e-6;
    let plausible = bounds.min_lon >= -180.0 - EPS
        && bounds.max_lon <= 180.0 + EPS
        && bounds.min_lat >= -90.0 - EPS
        && bounds.max_lat <= 90.0 + EPS;
    if !plausible {
        return Err(RasterError::verification(format!(
            "bounds {} fall outside WGS84",
            bounds
        )));
    }
    if !bounds.intersects(requested) {
        return Err(RasterError::verification(format!(
            "bounds {} do not overlap requested area {}",
            bounds, requested
        )));
    }
    let covered = coverage(bounds, requested);
    if covered + EPS < min_coverage {
        return Err(RasterError::verification(format!(
            "bounds {} cover {:.1}% of requested area {}, need {:.1}%",
            bounds,
            covered * 100.0,
            requested,
            min_coverage * 100.0
        )));
    }
    Ok(())
}

fn non_empty_file(path: &Path) -> Result<u64> {
    let size = std::fs::metadata(path)
        .map_err(|e| RasterError::verification(format!("{}: {}", path.display(), e)))?
        .len();
    if size == 0 {
        return Err(RasterError::verification(format!("{} is empty", path.display())));
    }
    Ok(size)
}

/// Reopen a GeoTIFF, decode its first chunk, and check its georeference.
pub fn verify_geotiff(path: &Path, requested: &BoundingBox, min_coverage: f64) -> Result<VerifiedOutput> {
    let file_size = non_empty_file(path)?;
    let info = probe_geotiff(path)?;
    if info.width == 0 || info.height == 0 {
        return Err(RasterError::verification("raster has zero pixels"));
    }
    let transform = info
        .transform
        .ok_or_else(|| RasterError::MissingGeoreference(path.to_path_buf()))?;
    let bounds = transform.bounds(info.width, info.height)?;
    check_bounds(&bounds, requested, min_coverage)?;

    debug!(path = %path.display(), width = info.width, height = info.height, "Verified GeoTIFF output");
    Ok(VerifiedOutput {
        width: info.width,
        height: info.height,
        bands: info.bands,
        sample_type: Some(info.sample_type),
        bounds,
        file_size,
    })
}

/// Reopen a PNG output and its world file.
pub fn verify_png(path: &Path, requested: &BoundingBox, min_coverage: f64) -> Result<VerifiedOutput> {
    let file_size = non_empty_file(path)?;
    let img = image::open(path)?;
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(RasterError::verification("image has zero pixels"));
    }

    let world = world_file_path(path);
    if !world.exists() {
        return Err(RasterError::MissingGeoreference(path.to_path_buf()));
    }
    let bounds = read_world_file(&world, width, height)?;
    check_bounds(&bounds, requested, min_coverage)?;

    Ok(VerifiedOutput {
        width,
        height,
        bands: img.color().channel_count() as u16,
        sample_type: None,
        bounds,
        file_size,
    })
}
