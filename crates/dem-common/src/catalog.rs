//! Catalog of remote elevation services.

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// A remote DEM service reachable through an ArcGIS-style export endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemSource {
    /// Short key used on the command line and in output names.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Base URL of the MapServer/ImageServer; `/exportImage` is appended.
    pub url: String,
    /// Native ground resolution in metres per pixel.
    pub resolution_m: f64,
    #[serde(default)]
    pub description: String,
}

impl DemSource {
    /// Display name for a job: the user's label with the source in
    /// parentheses, or the bare source name.
    pub fn display_name(&self, user_label: Option<&str>) -> String {
        match user_label.map(str::trim).filter(|s| !s.is_empty()) {
            Some(label) => format!("{} ({})", label, self.name),
            None => self.name.clone(),
        }
    }
}

/// Lookup table of [`DemSource`]s keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemCatalog {
    sources: Vec<DemSource>,
}

impl DemCatalog {
    pub fn new(sources: Vec<DemSource>) -> Self {
        Self { sources }
    }

    /// The Geoscience Australia services known out of the box.
    pub fn builtin() -> Self {
        Self::new(vec![
            DemSource {
                id: "lidar_5m".to_string(),
                name: "5m LiDAR DEM".to_string(),
                url: "https://services.ga.gov.au/gis/rest/services/DEM_LiDAR_5m_2025/MapServer"
                    .to_string(),
                resolution_m: 5.0,
                description: "High resolution LiDAR-derived elevation".to_string(),
            },
            DemSource {
                id: "national_1s".to_string(),
                name: "1 Second National DEM".to_string(),
                url: "https://services.ga.gov.au/gis/rest/services/DEM_SRTM_1Second_2024/MapServer"
                    .to_string(),
                resolution_m: 30.0,
                description: "National coverage from SRTM 1 arc-second".to_string(),
            },
        ])
    }

    pub fn get(&self, id: &str) -> Option<&DemSource> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Like [`DemCatalog::get`] but reports the known ids on a miss.
    pub fn require(&self, id: &str) -> CommonResult<&DemSource> {
        self.get(id).ok_or_else(|| {
            let known: Vec<&str> = self.sources.iter().map(|s| s.id.as_str()).collect();
            CommonError::UnknownSource {
                id: id.to_string(),
                known: known.join(", "),
            }
        })
    }

    /// Add or replace a source by id.
    pub fn insert(&mut self, source: DemSource) {
        match self.sources.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DemSource> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_sources() {
        let catalog = DemCatalog::builtin();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("lidar_5m").unwrap().resolution_m, 5.0);
        assert_eq!(catalog.get("national_1s").unwrap().resolution_m, 30.0);
    }

    #[test]
    fn test_require_unknown_lists_ids() {
        let err = DemCatalog::builtin().require("srtm_90m").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("srtm_90m"));
        assert!(msg.contains("lidar_5m"));
    }

    #[test]
    fn test_display_name() {
        let catalog = DemCatalog::builtin();
        let source = catalog.get("national_1s").unwrap();
        assert_eq!(
            source.display_name(Some("Brisbane CBD")),
            "Brisbane CBD (1 Second National DEM)"
        );
        assert_eq!(source.display_name(Some("  ")), "1 Second National DEM");
        assert_eq!(source.display_name(None), "1 Second National DEM");
    }

    #[test]
    fn test_insert_replaces() {
        let mut catalog = DemCatalog::builtin();
        let mut source = catalog.get("lidar_5m").unwrap().clone();
        source.url = "http://localhost:9000".to_string();
        catalog.insert(source);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("lidar_5m").unwrap().url, "http://localhost:9000");
    }
}
