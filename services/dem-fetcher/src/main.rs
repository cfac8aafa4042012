//! DEM fetcher command-line service.
//!
//! Fetches elevation rasters for arbitrary areas from ArcGIS export services:
//! - Splits large areas into request-sized chunks
//! - Retries transient upstream failures with exponential backoff
//! - Georeferences and merges RAW chunks, stitches RGB chunks
//! - Keeps a JSON status file next to each output for pollers

mod commands;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dem_common::{BoundingBox, DataVariant};
use dem_pipeline::PipelineConfig;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use commands::FetchRequest;

#[derive(Parser, Debug)]
#[command(name = "dem-fetcher")]
#[command(about = "Fetch chunked DEM exports and manage their outputs")]
struct Args {
    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    /// Sources catalog overriding the built-in services
    #[arg(long, env = "DEM_SOURCES_FILE", default_value = "config/sources.yaml", global = true)]
    sources_file: PathBuf,

    /// Serve Prometheus metrics on this address while running
    #[arg(long, env = "METRICS_ADDR", global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a DEM for a bounding box and wait for it to finish
    Fetch {
        /// Source id from the catalog (see `sources`)
        #[arg(short, long)]
        source: String,

        /// "minLon,minLat,maxLon,maxLat" in WGS84 degrees
        #[arg(short, long, allow_hyphen_values = true)]
        bbox: BoundingBox,

        /// Target resolution in metres per pixel (default: source native)
        #[arg(short, long)]
        resolution: Option<f64>,

        /// raw (float GeoTIFF) or rgb (PNG + world file)
        #[arg(long, default_value = "raw")]
        variant: DataVariant,

        /// Display name recorded in the status file
        #[arg(short, long)]
        name: Option<String>,

        /// Directory for outputs and status files
        #[arg(short, long, env = "DEM_OUTPUT_DIR", default_value = "dem_data")]
        output_dir: PathBuf,

        /// Largest width or height of one export request
        #[arg(long)]
        max_request_px: Option<u32>,

        /// Concurrent chunk requests
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Keep the per-job scratch directory after success
        #[arg(long)]
        keep_scratch: bool,
    },

    /// Show the status record of an output
    Status {
        /// Output file (the status file is found next to it)
        output: PathBuf,
    },

    /// Print the chunk grid for an area without fetching
    Plan {
        #[arg(short, long, allow_hyphen_values = true)]
        bbox: BoundingBox,

        #[arg(short, long)]
        resolution: Option<f64>,

        /// Use this source's native resolution when --resolution is absent
        #[arg(short, long)]
        source: Option<String>,

        #[arg(long)]
        max_request_px: Option<u32>,
    },

    /// List configured DEM sources
    Sources,

    /// Change the display name of an output
    Rename { output: PathBuf, name: String },

    /// Delete an output and its sidecar files
    Delete { output: PathBuf },
}

fn init_tracing(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries command output, logs go to stderr
    match args.log_format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(std::io::stderr)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args)?;

    if let Some(addr) = args.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(addr = %addr, "Prometheus metrics exporter listening");
    }

    let catalog = config::load_catalog(Some(&args.sources_file))?;
    let mut pipeline = PipelineConfig::from_env();
    debug!(?pipeline, "Pipeline configuration");

    match args.command {
        Command::Fetch {
            source,
            bbox,
            resolution,
            variant,
            name,
            output_dir,
            max_request_px,
            max_concurrent,
            keep_scratch,
        } => {
            if let Some(px) = max_request_px {
                pipeline.max_request_px = px;
            }
            if let Some(n) = max_concurrent {
                pipeline.max_concurrent_fetches = n;
            }
            pipeline.keep_scratch |= keep_scratch;
            pipeline.validate().map_err(anyhow::Error::msg)?;

            commands::fetch(
                &catalog,
                pipeline,
                FetchRequest {
                    source,
                    bbox,
                    resolution_m: resolution,
                    variant,
                    name,
                    output_dir,
                },
            )
            .await
        }
        Command::Status { output } => commands::status(&output, pipeline.status_lock_timeout).await,
        Command::Plan {
            bbox,
            resolution,
            source,
            max_request_px,
        } => commands::plan_only(
            &catalog,
            source.as_deref(),
            bbox,
            resolution,
            max_request_px.unwrap_or(pipeline.max_request_px),
        ),
        Command::Sources => commands::sources(&catalog),
        Command::Rename { output, name } => {
            commands::rename_output(&output, &name, pipeline.status_lock_timeout).await
        }
        Command::Delete { output } => commands::delete_output(&output).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let args = Args::try_parse_from([
            "dem-fetcher",
            "--log-format",
            "text",
            "fetch",
            "--source",
            "lidar_5m",
            "--bbox",
            "152.95,-27.5,153.05,-27.4",
            "--variant",
            "rgb",
        ])
        .unwrap();

        assert_eq!(args.log_format, LogFormat::Text);
        match args.command {
            Command::Fetch { bbox, variant, resolution, .. } => {
                assert_eq!(bbox.min_lat, -27.5);
                assert_eq!(variant, DataVariant::Rgb);
                assert!(resolution.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
