//! Test data generators for synthetic elevation data.
//!
//! Payloads are encoded as plain TIFF (no GeoTIFF tags) or PNG, matching
//! what the upstream export service sends before georeferencing.

use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};
use tiff::encoder::{colortype, TiffEncoder};

/// Creates a test grid with predictable values.
///
/// Each cell value is `col * 1000 + row`, so `grid[row * width + col]` can be
/// checked after a read or a placement on a larger canvas.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0);
/// assert_eq!(grid[10], 1.0);
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// A grid filled with one elevation.
pub fn create_constant_grid(width: usize, height: usize, value: f32) -> Vec<f32> {
    vec![value; width * height]
}

/// Encode an f32 grid as a single-band float TIFF.
pub fn encode_f32_tiff(width: u32, height: u32, data: &[f32]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf).expect("tiff encoder");
        encoder
            .write_image::<colortype::Gray32Float>(width, height, data)
            .expect("encode tiff");
    }
    buf.into_inner()
}

/// Encode a solid-colour RGBA PNG.
pub fn encode_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).expect("encode png");
    buf.into_inner()
}
