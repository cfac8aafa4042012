//! Coordinate Reference System codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Geographic CRS codes understood by the pipeline.
///
/// Output rasters are always stamped with EPSG:4326. GDA94 is accepted on
/// read because Australian services sometimes report it for the same grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsCode {
    /// WGS84 Geographic (lon/lat in degrees)
    #[default]
    Epsg4326,
    /// GDA94 Geographic
    Epsg4283,
}

impl CrsCode {
    /// Parse "EPSG:4326" style strings (case-insensitive, `CRS:84` accepted).
    pub fn parse(s: &str) -> Result<Self, CrsParseError> {
        match s.trim().to_uppercase().as_str() {
            "EPSG:4326" | "CRS:84" | "4326" => Ok(CrsCode::Epsg4326),
            "EPSG:4283" | "4283" => Ok(CrsCode::Epsg4283),
            _ => Err(CrsParseError::UnsupportedCrs(s.to_string())),
        }
    }

    /// Numeric EPSG code, as written into GeoTIFF keys.
    pub fn epsg(&self) -> u16 {
        match self {
            CrsCode::Epsg4326 => 4326,
            CrsCode::Epsg4283 => 4283,
        }
    }

    /// Reverse of [`CrsCode::epsg`].
    pub fn from_epsg(code: u16) -> Option<Self> {
        match code {
            4326 => Some(CrsCode::Epsg4326),
            4283 => Some(CrsCode::Epsg4283),
            _ => None,
        }
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),
}
