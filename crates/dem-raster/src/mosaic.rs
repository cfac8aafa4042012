//! Merge georeferenced chunks into one raster.
//!
//! Two passes: headers are probed first to size the canvas from the union
//! of input bounds, then each input is decoded and copied in one at a time
//! so only the canvas and a single chunk are resident.
//!
//! Where inputs overlap the first valid writer wins. Source no-data never
//! overwrites anything.

use std::path::{Path, PathBuf};

use dem_common::{BoundingBox, CrsCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{RasterError, Result};
use crate::georef::DEFAULT_NODATA;
use crate::geotiff::{probe_geotiff, read_geotiff, Raster, RasterInfo, Sample, SampleBuffer, SampleType};
use crate::transform::GeoTransform;

/// Relative tolerance when comparing input resolutions.
const RESOLUTION_TOLERANCE: f64 = 0.01;

/// Description of a merged output raster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MosaicResult {
    pub path: PathBuf,
    pub transform: GeoTransform,
    pub bounds: BoundingBox,
    pub bands: u16,
    pub sample_type: SampleType,
    pub width: u32,
    pub height: u32,
    pub inputs_used: usize,
    pub inputs_skipped: usize,
}

/// Reference layout taken from the first valid input.
struct Reference {
    sample_type: SampleType,
    bands: u16,
    crs: Option<CrsCode>,
    nodata: Option<f64>,
    res_x: f64,
    res_y: f64,
}

impl Reference {
    fn from_info(info: &RasterInfo, transform: &GeoTransform) -> Self {
        Self {
            sample_type: info.sample_type,
            bands: info.bands,
            crs: info.crs,
            nodata: info.nodata,
            res_x: transform.res_x(),
            res_y: transform.res_y(),
        }
    }

    fn mismatch(&self, info: &RasterInfo, transform: &GeoTransform) -> Option<String> {
        let close = |a: f64, b: f64| ((a - b) / b).abs() <= RESOLUTION_TOLERANCE;
        if info.sample_type != self.sample_type {
            Some(format!("sample type {:?} != {:?}", info.sample_type, self.sample_type))
        } else if info.bands != self.bands {
            Some(format!("{} bands != {}", info.bands, self.bands))
        } else if info.crs.unwrap_or_default() != self.crs.unwrap_or_default() {
            Some(format!("CRS {:?} != {:?}", info.crs, self.crs))
        } else if !close(transform.res_x(), self.res_x) || !close(transform.res_y(), self.res_y) {
            Some(format!(
                "resolution ({}, {}) != ({}, {})",
                transform.res_x(),
                transform.res_y(),
                self.res_x,
                self.res_y
            ))
        } else {
            None
        }
    }
}

/// Placement of one input on the canvas.
struct Placement {
    off_x: i64,
    off_y: i64,
    src_width: usize,
    src_height: usize,
}

/// Canvas under construction.
struct Canvas {
    width: usize,
    height: usize,
    bands: usize,
    samples: SampleBuffer,
    filled: Vec<bool>,
}

impl Canvas {
    fn new(width: usize, height: usize, bands: usize, sample_type: SampleType, fill: f64) -> Self {
        Self {
            width,
            height,
            bands,
            samples: SampleBuffer::filled(sample_type, width * height * bands, fill),
            filled: vec![false; width * height],
        }
    }

    /// Copy every valid source pixel into an unfilled canvas pixel.
    /// Returns the number of pixels written.
    fn blit(&mut self, source: &SampleBuffer, at: &Placement, nodata: Option<f64>) -> Result<usize> {
        let layout = (self.width, self.height, self.bands);
        let filled = &mut self.filled;
        match (&mut self.samples, source) {
            (SampleBuffer::U8(c), SampleBuffer::U8(s)) => Ok(blit_typed(c, filled, layout, s, at, nodata)),
            (SampleBuffer::U16(c), SampleBuffer::U16(s)) => Ok(blit_typed(c, filled, layout, s, at, nodata)),
            (SampleBuffer::I16(c), SampleBuffer::I16(s)) => Ok(blit_typed(c, filled, layout, s, at, nodata)),
            (SampleBuffer::I32(c), SampleBuffer::I32(s)) => Ok(blit_typed(c, filled, layout, s, at, nodata)),
            (SampleBuffer::F32(c), SampleBuffer::F32(s)) => Ok(blit_typed(c, filled, layout, s, at, nodata)),
            (SampleBuffer::F64(c), SampleBuffer::F64(s)) => Ok(blit_typed(c, filled, layout, s, at, nodata)),
            (c, s) => Err(RasterError::unsupported(format!(
                "cannot merge {:?} into {:?} canvas",
                s.sample_type(),
                c.sample_type()
            ))),
        }
    }
}

fn blit_typed<T: Sample>(
    canvas: &mut [T],
    filled: &mut [bool],
    (canvas_w, canvas_h, bands): (usize, usize, usize),
    source: &[T],
    at: &Placement,
    nodata: Option<f64>,
) -> usize {
    let mut written = 0;
    for row in 0..at.src_height {
        let y = at.off_y + row as i64;
        if y < 0 || y >= canvas_h as i64 {
            continue;
        }
        for col in 0..at.src_width {
            let x = at.off_x + col as i64;
            if x < 0 || x >= canvas_w as i64 {
                continue;
            }

            let dst_px = y as usize * canvas_w + x as usize;
            if filled[dst_px] {
                continue;
            }

            let src_base = (row * at.src_width + col) * bands;
            let pixel = &source[src_base..src_base + bands];
            if pixel.iter().all(|s| s.is_nodata(nodata)) {
                continue;
            }

            let dst_base = dst_px * bands;
            canvas[dst_base..dst_base + bands].copy_from_slice(pixel);
            filled[dst_px] = true;
            written += 1;
        }
    }
    written
}

/// Merge `inputs` into a single GeoTIFF at `output`.
///
/// Unreadable inputs and inputs whose layout differs from the first valid
/// one are skipped with a warning. Fails only when nothing usable remains.
pub fn merge(inputs: &[PathBuf], output: &Path) -> Result<MosaicResult> {
    // Pass 1: headers
    let mut reference: Option<Reference> = None;
    let mut accepted: Vec<(PathBuf, GeoTransform, BoundingBox)> = Vec::new();
    let mut union: Option<BoundingBox> = None;
    let mut skipped = 0usize;

    for path in inputs {
        let info = match probe_geotiff(path) {
            Ok(info) => info,
            Err(e) => {
                warn!(input = %path.display(), error = %e, "Skipping unreadable mosaic input");
                skipped += 1;
                continue;
            }
        };
        let Some(transform) = info.transform else {
            warn!(input = %path.display(), "Skipping mosaic input without georeference");
            skipped += 1;
            continue;
        };

        match &reference {
            None => reference = Some(Reference::from_info(&info, &transform)),
            Some(r) => {
                if let Some(reason) = r.mismatch(&info, &transform) {
                    warn!(input = %path.display(), reason = %reason, "Skipping mismatched mosaic input");
                    skipped += 1;
                    continue;
                }
            }
        }

        let bounds = transform.bounds(info.width, info.height)?;
        union = Some(match union {
            Some(u) => u.union(&bounds),
            None => bounds,
        });
        accepted.push((path.clone(), transform, bounds));
    }

    let (Some(reference), Some(union)) = (reference, union) else {
        return Err(RasterError::EmptyMosaic);
    };

    let width = ((union.width() / reference.res_x).round() as usize).max(1);
    let height = ((union.height() / reference.res_y).round() as usize).max(1);
    let nodata = reference.nodata.unwrap_or(DEFAULT_NODATA);
    debug!(width, height, inputs = accepted.len(), "Allocating mosaic canvas");

    let mut canvas = Canvas::new(width, height, reference.bands as usize, reference.sample_type, nodata);

    // Pass 2: pixels
    let mut used = 0usize;
    for (path, _, bounds) in &accepted {
        let raster = match read_geotiff(path) {
            Ok(r) => r,
            Err(e) => {
                warn!(input = %path.display(), error = %e, "Skipping mosaic input that failed to decode");
                skipped += 1;
                continue;
            }
        };

        let placement = Placement {
            off_x: ((bounds.min_lon - union.min_lon) / reference.res_x).round() as i64,
            off_y: ((union.max_lat - bounds.max_lat) / reference.res_y).round() as i64,
            src_width: raster.info.width as usize,
            src_height: raster.info.height as usize,
        };
        let written = canvas.blit(&raster.samples, &placement, raster.info.nodata)?;
        debug!(input = %path.display(), off_x = placement.off_x, off_y = placement.off_y, written, "Placed mosaic input");
        used += 1;
    }

    if used == 0 {
        return Err(RasterError::EmptyMosaic);
    }

    let transform = GeoTransform::from_origin(union.min_lon, union.max_lat, reference.res_x, reference.res_y)?;
    let merged = Raster::new(width as u32, height as u32, reference.bands, canvas.samples)?
        .with_transform(transform)
        .with_crs(reference.crs.unwrap_or_default())
        .with_nodata(nodata);
    crate::geotiff::write_geotiff(output, &merged)?;

    let bounds = transform.bounds(width as u32, height as u32)?;
    info!(
        output = %output.display(),
        width,
        height,
        used,
        skipped,
        "Mosaic written"
    );

    Ok(MosaicResult {
        path: output.to_path_buf(),
        transform,
        bounds,
        bands: reference.bands,
        sample_type: reference.sample_type,
        width: width as u32,
        height: height as u32,
        inputs_used: used,
        inputs_skipped: skipped,
    })
}
