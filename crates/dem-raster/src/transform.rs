//! North-up affine pixel-to-world transform.

use dem_common::BoundingBox;
use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};

/// Affine transform for a north-up raster without rotation.
///
/// `origin_x`/`origin_y` is the outer corner of the top-left pixel.
/// `pixel_height` is negative: rows advance southwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Build a transform anchored at the northwest corner, taking positive
    /// pixel sizes in both directions.
    pub fn from_origin(west: f64, north: f64, res_x: f64, res_y: f64) -> Result<Self> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !west.is_finite() || !north.is_finite() || !valid(res_x) || !valid(res_y) {
            return Err(RasterError::DegenerateTransform(format!(
                "origin ({}, {}) resolution ({}, {})",
                west, north, res_x, res_y
            )));
        }

        Ok(Self {
            origin_x: west,
            origin_y: north,
            pixel_width: res_x,
            pixel_height: -res_y,
        })
    }

    /// Transform that maps a `width` x `height` grid exactly onto `bbox`.
    pub fn from_bbox(bbox: &BoundingBox, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RasterError::DegenerateTransform(format!(
                "zero-sized raster {}x{}",
                width, height
            )));
        }
        Self::from_origin(
            bbox.min_lon,
            bbox.max_lat,
            bbox.width() / width as f64,
            bbox.height() / height as f64,
        )
    }

    /// Positive resolution along x (degrees per pixel).
    pub fn res_x(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Positive resolution along y (degrees per pixel).
    pub fn res_y(&self) -> f64 {
        self.pixel_height.abs()
    }

    /// Extent covered by a `width` x `height` raster.
    pub fn bounds(&self, width: u32, height: u32) -> Result<BoundingBox> {
        let east = self.origin_x + width as f64 * self.res_x();
        let south = self.origin_y - height as f64 * self.res_y();
        Ok(BoundingBox::new(self.origin_x, south, east, self.origin_y)?)
    }

    /// GDAL-ordered coefficients `(c, a, b, f, d, e)`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.origin_x, self.pixel_width, 0.0, self.origin_y, 0.0, self.pixel_height]
    }
}
