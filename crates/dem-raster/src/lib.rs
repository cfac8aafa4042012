//! Raster handling for DEM chunks.
//!
//! - [`geotiff`]: typed sample buffers and GeoTIFF read/write
//! - [`georef`]: stamp a transform and CRS onto a raw chunk
//! - [`mosaic`]: merge georeferenced chunks into one raster
//! - [`stitch`]: place RGB image chunks on a canvas, with world file
//! - [`verify`]: reopen and sanity-check a finished output

pub mod error;
pub mod georef;
pub mod geotiff;
pub mod mosaic;
pub mod stitch;
pub mod transform;
pub mod verify;

pub use error::{RasterError, Result};
pub use georef::{georef_path, stamp, DEFAULT_NODATA};
pub use geotiff::{probe_geotiff, read_geotiff, write_geotiff, Raster, RasterInfo, Sample, SampleBuffer, SampleType};
pub use mosaic::{merge, MosaicResult};
pub use stitch::{promote_rgb, stitch_rgb, StitchLayout, StitchResult, StitchTile};
pub use transform::GeoTransform;
pub use verify::{verify_geotiff, verify_png, VerifiedOutput};
