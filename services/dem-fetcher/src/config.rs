//! Source catalog loading.
//!
//! The built-in catalog can be extended or overridden from a YAML file:
//!
//! ```yaml
//! sources:
//!   - id: lidar_5m
//!     name: 5m LiDAR DEM
//!     url: https://services.ga.gov.au/gis/rest/services/DEM_LiDAR_5m_2025/MapServer
//!     resolution_m: 5
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use dem_common::{DemCatalog, DemSource};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Root of a sources YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesFile {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

/// One catalog entry as written in YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub id: String,
    pub name: String,
    pub url: String,
    pub resolution_m: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<SourceEntry> for DemSource {
    fn from(entry: SourceEntry) -> Self {
        DemSource {
            id: entry.id,
            name: entry.name,
            url: entry.url,
            resolution_m: entry.resolution_m,
            description: entry.description,
        }
    }
}

impl SourcesFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sources file: {}", path.display()))?;

        let file: SourcesFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse sources file: {}", path.display()))?;

        debug!(path = %path.display(), sources = file.sources.len(), "Loaded sources file");
        Ok(file)
    }
}

/// Built-in catalog with entries from `path` layered on top.
pub fn load_catalog(path: Option<&Path>) -> Result<DemCatalog> {
    let mut catalog = DemCatalog::builtin();

    let Some(path) = path else {
        return Ok(catalog);
    };
    if !path.exists() {
        warn!(path = %path.display(), "Sources file not found, using built-in catalog");
        return Ok(catalog);
    }

    for entry in SourcesFile::load(path)?.sources {
        if !entry.enabled {
            debug!(source = %entry.id, "Skipping disabled source");
            continue;
        }
        if !(entry.resolution_m.is_finite() && entry.resolution_m > 0.0) {
            warn!(source = %entry.id, resolution_m = entry.resolution_m, "Skipping source with invalid resolution");
            continue;
        }
        info!(source = %entry.id, name = %entry.name, "Loaded source configuration");
        catalog.insert(entry.into());
    }
    Ok(catalog)
}
