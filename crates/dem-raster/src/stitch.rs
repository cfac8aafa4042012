//! Spatial stitching of RGB visualization chunks.
//!
//! Image chunks carry no georeference of their own. Placement follows the
//! chunk grid: row 0 is the southern-most row, so it lands at the bottom of
//! the canvas. The result gets a `.pgw` world file and an `_info.json`
//! sidecar so GIS tools can position it.

use std::fs;
use std::path::{Path, PathBuf};

use dem_common::BoundingBox;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RasterError, Result};

/// One fetched image chunk and its grid cell.
#[derive(Debug, Clone)]
pub struct StitchTile {
    pub row: u32,
    pub col: u32,
    pub path: PathBuf,
}

/// Grid geometry shared by every chunk of a job.
#[derive(Debug, Clone, Copy)]
pub struct StitchLayout {
    pub rows: u32,
    pub cols: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub bbox: BoundingBox,
}

impl StitchLayout {
    pub fn canvas_size(&self) -> (u32, u32) {
        (self.cols * self.tile_width, self.rows * self.tile_height)
    }
}

/// Contents of the `_info.json` sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub source: String,
    pub bbox: [f64; 4],
    pub width: u32,
    pub height: u32,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    /// Approximate ground metres per pixel along x.
    pub scale_m: f64,
    pub chunks: usize,
}

/// Outcome of a stitch.
#[derive(Debug, Clone)]
pub struct StitchResult {
    pub path: PathBuf,
    pub world_file: PathBuf,
    pub info_file: PathBuf,
    pub width: u32,
    pub height: u32,
    pub tiles_placed: usize,
    pub tiles_skipped: usize,
}

/// `<stem>.pgw` next to the image.
pub fn world_file_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("pgw")
}

/// `<stem>_info.json` next to the image.
pub fn info_file_path(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    image_path.with_file_name(format!("{}_info.json", stem))
}

/// Write the six-line world file mapping a `width` x `height` image onto `bbox`.
pub fn write_world_file(image_path: &Path, bbox: &BoundingBox, width: u32, height: u32) -> Result<PathBuf> {
    let x_scale = bbox.width() / width.max(1) as f64;
    let y_scale = bbox.height() / height.max(1) as f64;
    let contents = format!(
        "{}\n0.0\n0.0\n{}\n{}\n{}\n",
        x_scale, -y_scale, bbox.min_lon, bbox.max_lat
    );
    let path = world_file_path(image_path);
    fs::write(&path, contents)?;
    Ok(path)
}

/// Parse a world file back into the bounds of a `width` x `height` image.
pub fn read_world_file(path: &Path, width: u32, height: u32) -> Result<BoundingBox> {
    let text = fs::read_to_string(path)?;
    let values: Vec<f64> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            l.parse::<f64>()
                .map_err(|_| RasterError::verification(format!("bad world file line '{}'", l)))
        })
        .collect::<Result<_>>()?;
    if values.len() != 6 {
        return Err(RasterError::verification(format!(
            "world file has {} values, expected 6",
            values.len()
        )));
    }

    let (x_scale, y_scale, west, north) = (values[0], values[3], values[4], values[5]);
    let east = west + x_scale * width as f64;
    let south = north + y_scale * height as f64;
    Ok(BoundingBox::new(west, south, east, north)?)
}

/// Write the `_info.json` sidecar.
pub fn write_info_file(image_path: &Path, info: &ImageInfo) -> Result<PathBuf> {
    let path = info_file_path(image_path);
    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, info)?;
    Ok(path)
}

fn image_info(source: &str, bbox: &BoundingBox, width: u32, height: u32, chunks: usize) -> ImageInfo {
    let pixel_size_x = bbox.width() / width.max(1) as f64;
    ImageInfo {
        source: source.to_string(),
        bbox: [bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat],
        width,
        height,
        pixel_size_x,
        pixel_size_y: bbox.height() / height.max(1) as f64,
        scale_m: pixel_size_x * dem_common::METERS_PER_DEGREE,
        chunks,
    }
}

/// Stitch `tiles` into one PNG covering `layout.bbox`.
///
/// Chunks returned at an unexpected size are resized to the planned cell.
/// Unreadable chunks leave transparent holes.
pub fn stitch_rgb(tiles: &[StitchTile], layout: &StitchLayout, source: &str, output: &Path) -> Result<StitchResult> {
    let (width, height) = layout.canvas_size();
    let mut canvas = RgbaImage::new(width, height);
    let mut placed = 0usize;
    let mut skipped = 0usize;

    for tile in tiles {
        if tile.row >= layout.rows || tile.col >= layout.cols {
            warn!(row = tile.row, col = tile.col, "Chunk outside stitch grid");
            skipped += 1;
            continue;
        }

        let mut img = match image::open(&tile.path) {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                warn!(chunk = %tile.path.display(), error = %e, "Skipping unreadable image chunk");
                skipped += 1;
                continue;
            }
        };
        if img.dimensions() != (layout.tile_width, layout.tile_height) {
            debug!(
                chunk = %tile.path.display(),
                got = ?img.dimensions(),
                "Resizing image chunk to planned size"
            );
            img = imageops::resize(&img, layout.tile_width, layout.tile_height, FilterType::Triangle);
        }

        let x = tile.col * layout.tile_width;
        let y = (layout.rows - 1 - tile.row) * layout.tile_height;
        imageops::replace(&mut canvas, &img, x as i64, y as i64);
        placed += 1;
    }

    if placed == 0 {
        return Err(RasterError::EmptyMosaic);
    }

    canvas.save_with_format(output, ImageFormat::Png)?;
    let world_file = write_world_file(output, &layout.bbox, width, height)?;
    let info_file = write_info_file(output, &image_info(source, &layout.bbox, width, height, placed))?;

    info!(output = %output.display(), width, height, placed, skipped, "Stitched RGB image");
    Ok(StitchResult {
        path: output.to_path_buf(),
        world_file,
        info_file,
        width,
        height,
        tiles_placed: placed,
        tiles_skipped: skipped,
    })
}

/// Single-chunk RGB output: copy the chunk and add the sidecars.
pub fn promote_rgb(chunk: &Path, bbox: &BoundingBox, source: &str, output: &Path) -> Result<StitchResult> {
    let (width, height) = image::image_dimensions(chunk)?;
    fs::copy(chunk, output)?;
    let world_file = write_world_file(output, bbox, width, height)?;
    let info_file = write_info_file(output, &image_info(source, bbox, width, height, 1))?;
    Ok(StitchResult {
        path: output.to_path_buf(),
        world_file,
        info_file,
        width,
        height,
        tiles_placed: 1,
        tiles_skipped: 0,
    })
}
