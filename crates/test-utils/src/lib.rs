//! Shared test utilities for the DEM fetch workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Fixture bounding boxes for the planning scenarios
//! - Synthetic elevation grids and encoded TIFF/PNG payloads
//! - A mock upstream export service on a loopback port
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, MockUpstream, UpstreamBehavior};
//! ```

pub mod fixtures;
pub mod generators;
pub mod upstream;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use upstream::{MockUpstream, UpstreamBehavior};

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(153.0000001_f64, 153.0_f64, 1e-6_f64); // passes
/// assert_approx_eq!(-27.4_f64, -27.5_f64, 1e-6_f64);       // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Approximate equality of every edge of two bounding boxes.
///
/// Works with any value exposing `min_lon`, `min_lat`, `max_lon`, `max_lat`.
#[macro_export]
macro_rules! assert_bbox_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let (l, r) = (&$left, &$right);
        $crate::assert_approx_eq!(l.min_lon, r.min_lon, $epsilon);
        $crate::assert_approx_eq!(l.min_lat, r.min_lat, $epsilon);
        $crate::assert_approx_eq!(l.max_lon, r.max_lon, $epsilon);
        $crate::assert_approx_eq!(l.max_lat, r.max_lat, $epsilon);
    }};
}
