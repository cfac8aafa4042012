//! Integration test: georeference a 2x2 grid of raw chunks and merge them.
//!
//! 1. Write four plain float TIFFs, as the export service would return them
//! 2. Stamp each with its quadrant's bbox
//! 3. Merge and verify union bounds and per-quadrant values

use std::path::{Path, PathBuf};

use dem_common::BoundingBox;
use dem_raster::{merge, read_geotiff, stamp, verify_geotiff, SampleType};
use test_utils::{assert_approx_eq, assert_bbox_approx_eq, create_constant_grid, create_test_grid, encode_f32_tiff};

const CHUNK_PX: u32 = 20;

fn quadrant(row: u32, col: u32) -> BoundingBox {
    // Row 0 is the southern row
    let (west, south) = (153.0 + col as f64 * 0.5, -28.0 + row as f64 * 0.5);
    BoundingBox::new(west, south, west + 0.5, south + 0.5).unwrap()
}

fn quadrant_value(row: u32, col: u32) -> f32 {
    100.0 * (row * 2 + col + 1) as f32
}

fn write_raw_chunk(dir: &Path, row: u32, col: u32) -> PathBuf {
    let path = dir.join(format!("chunk_{}_{}.tif", row, col));
    let grid = create_constant_grid(CHUNK_PX as usize, CHUNK_PX as usize, quadrant_value(row, col));
    std::fs::write(&path, encode_f32_tiff(CHUNK_PX, CHUNK_PX, &grid)).unwrap();
    path
}

#[test]
fn test_two_by_two_mosaic_roundtrip() {
    let dir = tempfile::tempdir().unwrap();

    let mut georefs = Vec::new();
    for row in 0..2 {
        for col in 0..2 {
            let raw = write_raw_chunk(dir.path(), row, col);
            georefs.push(stamp(&raw, &quadrant(row, col)).unwrap());
        }
    }

    let out = dir.path().join("merged.tif");
    let result = merge(&georefs, &out).unwrap();

    let expected = BoundingBox::new(153.0, -28.0, 154.0, -27.0).unwrap();
    assert_bbox_approx_eq!(result.bounds, expected, 1e-9);
    assert_eq!((result.width, result.height), (2 * CHUNK_PX, 2 * CHUNK_PX));
    assert_eq!(result.sample_type, SampleType::F32);
    assert_eq!(result.inputs_used, 4);

    let merged = read_geotiff(&out).unwrap();
    let half = CHUNK_PX / 2;
    // Top-left of the canvas is the north-west quadrant (row 1, col 0)
    let probes = [
        (half, half, quadrant_value(1, 0)),
        (CHUNK_PX + half, half, quadrant_value(1, 1)),
        (half, CHUNK_PX + half, quadrant_value(0, 0)),
        (CHUNK_PX + half, CHUNK_PX + half, quadrant_value(0, 1)),
    ];
    for (x, y, value) in probes {
        assert_eq!(merged.value_at(x, y, 0), Some(value as f64), "pixel ({}, {})", x, y);
    }

    // No gaps at the seams
    for x in 0..2 * CHUNK_PX {
        for y in [CHUNK_PX - 1, CHUNK_PX] {
            assert_ne!(merged.value_at(x, y, 0), Some(-9999.0));
        }
    }

    let verified = verify_geotiff(&out, &expected, 1.0).unwrap();
    assert_eq!(verified.width, 2 * CHUNK_PX);
}

#[test]
fn test_missing_quadrant_leaves_nodata() {
    let dir = tempfile::tempdir().unwrap();

    let mut georefs = Vec::new();
    for (row, col) in [(0, 0), (0, 1), (1, 0)] {
        let raw = write_raw_chunk(dir.path(), row, col);
        georefs.push(stamp(&raw, &quadrant(row, col)).unwrap());
    }

    let out = dir.path().join("merged.tif");
    let result = merge(&georefs, &out).unwrap();
    assert_eq!((result.width, result.height), (2 * CHUNK_PX, 2 * CHUNK_PX));

    let merged = read_geotiff(&out).unwrap();
    assert_eq!(merged.value_at(2 * CHUNK_PX - 1, 0, 0), Some(-9999.0));
    assert_eq!(merged.info.nodata, Some(-9999.0));
}

#[test]
fn test_stamp_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let raw = write_raw_chunk(dir.path(), 0, 0);
    let bbox = quadrant(0, 0);

    let first = read_geotiff(&stamp(&raw, &bbox).unwrap()).unwrap();
    let second = read_geotiff(&stamp(&raw, &bbox).unwrap()).unwrap();

    let (a, b) = (first.info.transform.unwrap(), second.info.transform.unwrap());
    assert_eq!(a.to_gdal().map(f64::to_bits), b.to_gdal().map(f64::to_bits));
    assert_approx_eq!(a.res_x(), 0.5 / CHUNK_PX as f64, 1e-15);
}

#[test]
fn test_stamp_and_merge_keep_pixel_order() {
    let dir = tempfile::tempdir().unwrap();
    let (w, h) = (CHUNK_PX, CHUNK_PX / 2);
    let raw = dir.path().join("ordered.tif");
    std::fs::write(&raw, encode_f32_tiff(w, h, &create_test_grid(w as usize, h as usize))).unwrap();

    let bbox = BoundingBox::new(153.0, -27.5, 153.2, -27.4).unwrap();
    let georef = stamp(&raw, &bbox).unwrap();
    let out = dir.path().join("ordered_merged.tif");
    merge(&[georef], &out).unwrap();

    // Row 0 stays the northern edge and col 0 the western edge
    let merged = read_geotiff(&out).unwrap();
    for (col, row) in [(0, 0), (w - 1, 0), (0, h - 1), (7, 3)] {
        let expected = (col * 1000 + row) as f64;
        assert_eq!(merged.value_at(col, row, 0), Some(expected), "pixel ({}, {})", col, row);
    }
}
