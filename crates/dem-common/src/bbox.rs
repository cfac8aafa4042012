//! Geographic bounding box in WGS84 degrees.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A lon/lat bounding box in degrees.
///
/// Always constructed through [`BoundingBox::new`] or parsing, both of which
/// enforce `min_lon < max_lon` and `min_lat < max_lat`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Create a bounding box, rejecting inverted, empty or non-finite extents.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, BboxParseError> {
        let bbox = Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Parse a "minLon,minLat,maxLon,maxLat" string.
    pub fn parse(s: &str) -> Result<Self, BboxParseError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(part.to_string()))?;
        }

        Self::new(values[0], values[1], values[2], values[3])
    }

    /// Check the ordering invariant. Used after deserializing untrusted input.
    pub fn validate(&self) -> Result<(), BboxParseError> {
        let all_finite = [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(BboxParseError::NonFinite);
        }
        if self.min_lon >= self.max_lon {
            return Err(BboxParseError::Inverted {
                axis: "longitude",
                min: self.min_lon,
                max: self.max_lon,
            });
        }
        if self.min_lat >= self.max_lat {
            return Err(BboxParseError::Inverted {
                axis: "latitude",
                min: self.min_lat,
                max: self.max_lat,
            });
        }
        Ok(())
    }

    /// Longitude span in degrees.
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Latitude span in degrees.
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon < other.max_lon
            && self.max_lon > other.min_lon
            && self.min_lat < other.max_lat
            && self.max_lat > other.min_lat
    }

    /// Compute the intersection of two bounding boxes.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }

        Some(BoundingBox {
            min_lon: self.min_lon.max(other.min_lon),
            min_lat: self.min_lat.max(other.min_lat),
            max_lon: self.max_lon.min(other.max_lon),
            max_lat: self.max_lat.min(other.max_lat),
        })
    }

    /// Smallest bbox covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// True when every edge lies inside the WGS84 domain.
    pub fn within_wgs84(&self) -> bool {
        self.min_lon >= -180.0 && self.max_lon <= 180.0 && self.min_lat >= -90.0 && self.max_lat <= 90.0
    }

    /// Comma-joined form used in service query strings.
    pub fn to_query_string(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }

    /// Filename-safe fragment: coordinates joined by `_` with `.` replaced by `p`.
    pub fn file_token(&self) -> String {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
            .iter()
            .map(|v| v.to_string().replace('.', "p"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

impl FromStr for BoundingBox {
    type Err = BboxParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BboxParseError {
    #[error("Invalid bbox format: {0}. Expected 'minLon,minLat,maxLon,maxLat'")]
    InvalidFormat(String),

    #[error("Invalid number in bbox: {0}")]
    InvalidNumber(String),

    #[error("Bbox coordinates must be finite")]
    NonFinite,

    #[error("Invalid {axis} range: min {min} must be less than max {max}")]
    Inverted {
        axis: &'static str,
        min: f64,
        max: f64,
    },
}
