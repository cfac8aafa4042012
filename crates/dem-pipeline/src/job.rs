//! Job specification handed to the orchestrator.

use std::path::{Path, PathBuf};

use dem_common::{BoundingBox, DataVariant, DemSource};
use serde::Serialize;

use crate::outputs::{output_file_name, status_path_for, unique_output_path};

/// Everything one fetch job needs. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    pub bbox: BoundingBox,
    /// Target ground resolution in metres per pixel.
    pub resolution_m: f64,
    pub variant: DataVariant,
    pub output_path: PathBuf,
    pub status_path: PathBuf,
    pub display_name: String,
    /// Base URL of the export service, without `/exportImage`.
    pub service_url: String,
    /// Human-readable source name written into RGB sidecars.
    pub source_name: String,
}

impl JobSpec {
    /// Build a job for a catalog source, picking a free output name in
    /// `output_dir`. `resolution_m` falls back to the source's native resolution.
    pub fn for_source(
        source: &DemSource,
        bbox: BoundingBox,
        resolution_m: Option<f64>,
        variant: DataVariant,
        output_dir: &Path,
        label: Option<&str>,
    ) -> Self {
        let file_name = output_file_name(variant, &source.id, &bbox);
        let output_path = unique_output_path(output_dir, &file_name);
        let status_path = status_path_for(&output_path);

        Self {
            bbox,
            resolution_m: resolution_m.unwrap_or(source.resolution_m),
            variant,
            output_path,
            status_path,
            display_name: source.display_name(label),
            service_url: source.url.clone(),
            source_name: source.name.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.bbox.validate().map_err(|e| e.to_string())?;
        if !self.bbox.within_wgs84() {
            return Err(format!("bbox {} is outside WGS84 bounds", self.bbox));
        }
        if !self.resolution_m.is_finite() || self.resolution_m <= 0.0 {
            return Err(format!("resolution must be positive, got {}", self.resolution_m));
        }
        if self.service_url.trim().is_empty() {
            return Err("service_url must not be empty".to_string());
        }
        if self.output_path.as_os_str().is_empty() || self.status_path.as_os_str().is_empty() {
            return Err("output and status paths are required".to_string());
        }
        if self.output_path == self.status_path {
            return Err("status path must differ from the output path".to_string());
        }
        Ok(())
    }
}
