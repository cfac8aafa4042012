//! Output data variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What kind of raster a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataVariant {
    /// Floating-point elevation GeoTIFF.
    Raw,
    /// 8-bit colour visualization image.
    Rgb,
}

impl DataVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataVariant::Raw => "raw",
            DataVariant::Rgb => "rgb",
        }
    }

    /// Extension of both chunk files and the final output.
    pub fn extension(&self) -> &'static str {
        match self {
            DataVariant::Raw => "tif",
            DataVariant::Rgb => "png",
        }
    }

    /// Whether chunks are georeferenced before merging.
    pub fn needs_georeference(&self) -> bool {
        matches!(self, DataVariant::Raw)
    }
}

impl fmt::Display for DataVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(DataVariant::Raw),
            "rgb" => Ok(DataVariant::Rgb),
            other => Err(format!("unknown data variant '{}', expected raw or rgb", other)),
        }
    }
}
