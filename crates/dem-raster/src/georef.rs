//! Stamp georeferencing onto raw elevation chunks.

use std::path::{Path, PathBuf};

use dem_common::{BoundingBox, CrsCode};
use tracing::debug;

use crate::error::{RasterError, Result};
use crate::geotiff::{read_geotiff, write_geotiff};
use crate::transform::GeoTransform;

/// No-data value assigned when the service response carries none.
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Sibling path for the georeferenced copy of `chunk_path`: `<stem>_georef.tif`.
pub fn georef_path(chunk_path: &Path) -> PathBuf {
    let stem = chunk_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chunk".to_string());
    chunk_path.with_file_name(format!("{}_georef.tif", stem))
}

/// Rewrite a raw chunk with a transform mapping its pixel grid onto
/// `bbox`, CRS EPSG:4326 and a no-data value.
///
/// Band count and sample type are preserved. The transform depends only
/// on `bbox` and the pixel dimensions, so repeated calls are identical.
pub fn stamp(chunk_path: &Path, bbox: &BoundingBox) -> Result<PathBuf> {
    let mut raster = read_geotiff(chunk_path)?;
    if raster.info.width == 0 || raster.info.height == 0 {
        return Err(RasterError::DegenerateTransform(format!(
            "{} is empty",
            chunk_path.display()
        )));
    }

    let transform = GeoTransform::from_bbox(bbox, raster.info.width, raster.info.height)?;
    raster.info.transform = Some(transform);
    raster.info.crs = Some(CrsCode::Epsg4326);
    raster.info.nodata = Some(raster.info.nodata.unwrap_or(DEFAULT_NODATA));

    let out = georef_path(chunk_path);
    write_geotiff(&out, &raster)?;

    debug!(
        chunk = %chunk_path.display(),
        res_x = transform.res_x(),
        res_y = transform.res_y(),
        "Georeferenced chunk"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geotiff::{Raster, SampleBuffer};

    fn write_plain_chunk(path: &Path, width: u32, height: u32) {
        let data = vec![42.0f32; (width * height) as usize];
        let raster = Raster::new(width, height, 1, SampleBuffer::F32(data)).unwrap();
        write_geotiff(path, &raster).unwrap();
    }

    #[test]
    fn test_georef_path_naming() {
        assert_eq!(
            georef_path(Path::new("/tmp/job/chunk_0_1.tif")),
            PathBuf::from("/tmp/job/chunk_0_1_georef.tif")
        );
    }

    #[test]
    fn test_stamp_sets_transform_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = dir.path().join("chunk_0_0.tif");
        write_plain_chunk(&chunk, 10, 5);

        let bbox = BoundingBox::new(152.0, -28.0, 153.0, -27.5).unwrap();
        let out = stamp(&chunk, &bbox).unwrap();
        let raster = read_geotiff(&out).unwrap();

        let t = raster.info.transform.unwrap();
        assert_eq!(t.origin_x, 152.0);
        assert_eq!(t.origin_y, -27.5);
        assert!((t.res_x() - 0.1).abs() < 1e-12);
        assert!((t.res_y() - 0.1).abs() < 1e-12);
        assert_eq!(raster.info.crs, Some(CrsCode::Epsg4326));
        assert_eq!(raster.info.nodata, Some(DEFAULT_NODATA));
        assert_eq!(raster.value_at(9, 4, 0), Some(42.0));
    }

    #[test]
    fn test_stamp_rejects_corrupt_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = dir.path().join("chunk_0_0.tif");
        std::fs::write(&chunk, b"<html>Service unavailable</html>").unwrap();

        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        assert!(stamp(&chunk, &bbox).is_err());
        assert!(!georef_path(&chunk).exists());
    }
}
