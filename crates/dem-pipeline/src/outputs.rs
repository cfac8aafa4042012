//! Output naming and management of finished job artifacts.

use std::path::{Path, PathBuf};

use dem_common::{BoundingBox, DataVariant};
use dem_raster::stitch::{info_file_path, world_file_path};
use tracing::{debug, info};

use crate::error::StatusError;
use crate::lock::lock_path_for;
use crate::status::{FileSize, StatusRecord, StatusStore};

/// `<variant>_<source>_<bbox token>.<ext>`
pub fn output_file_name(variant: DataVariant, source_id: &str, bbox: &BoundingBox) -> String {
    format!(
        "{}_{}_{}.{}",
        variant.as_str(),
        source_id,
        bbox.file_token(),
        variant.extension()
    )
}

/// A name is taken once its status file exists, before the output is written.
fn is_taken(output: &Path) -> bool {
    output.exists() || status_path_for(output).exists()
}

/// `dir/file_name`, or `dir/<stem>_N.<ext>` with the first free `N`.
pub fn unique_output_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !is_taken(&candidate) {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(file_name);
    let ext = path.extension().and_then(|s| s.to_str());

    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        })
        .find(|p| !is_taken(p))
        .unwrap_or(candidate)
}

fn with_stem_suffix(output: &Path, suffix: &str) -> PathBuf {
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    output.with_file_name(format!("{}{}", stem, suffix))
}

/// `<stem>_status.json` next to the output.
pub fn status_path_for(output: &Path) -> PathBuf {
    with_stem_suffix(output, "_status.json")
}

/// `<status>.log`
pub fn log_path_for(status_path: &Path) -> PathBuf {
    let mut name = status_path.as_os_str().to_os_string();
    name.push(".log");
    PathBuf::from(name)
}

/// Every file a job may leave next to its output, excluding the output itself.
pub fn sidecar_paths(output: &Path) -> Vec<PathBuf> {
    let status = status_path_for(output);
    vec![
        world_file_path(output),
        info_file_path(output),
        log_path_for(&status),
        lock_path_for(&status),
        status,
    ]
}

/// Status record for an output, with its current size attached when the
/// output exists.
pub async fn describe(store: &dyn StatusStore, output: &Path) -> StatusRecord {
    let mut record = store.read(&status_path_for(output)).await;
    if let Ok(size) = FileSize::of_file(output).await {
        record.file_size = Some(size);
    }
    record
}

/// Set a new display name on an output's status record.
pub async fn rename(store: &dyn StatusStore, output: &Path, display_name: &str) -> Result<StatusRecord, StatusError> {
    let name = display_name.trim().to_string();
    if name.is_empty() {
        return Err(StatusError::InvalidUpdate("display name must not be empty".to_string()));
    }
    let status_path = status_path_for(output);
    if !tokio::fs::try_exists(&status_path).await.unwrap_or(false) {
        return Err(StatusError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no status record at {}", status_path.display()),
        )));
    }
    store
        .update(&status_path, Box::new(move |r| r.display_name = Some(name)))
        .await
}

/// Remove an output and its sidecars. Returns the paths actually removed.
pub async fn delete_outputs(output: &Path) -> std::io::Result<Vec<PathBuf>> {
    tokio::fs::remove_file(output).await?;
    let mut removed = vec![output.to_path_buf()];

    for path in sidecar_paths(output) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Sidecar not present");
            }
            Err(e) => return Err(e),
        }
    }
    info!(output = %output.display(), files = removed.len(), "Deleted DEM output");
    Ok(removed)
}
