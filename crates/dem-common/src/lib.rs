//! Common types shared across the DEM fetch workspace.

pub mod bbox;
pub mod catalog;
pub mod crs;
pub mod error;
pub mod variant;

pub use bbox::{BboxParseError, BoundingBox};
pub use catalog::{DemCatalog, DemSource};
pub use crs::CrsCode;
pub use error::{CommonError, CommonResult};
pub use variant::DataVariant;

/// Approximate metres per degree used when converting a ground resolution
/// into an angular pixel size.
pub const METERS_PER_DEGREE: f64 = 111_000.0;
