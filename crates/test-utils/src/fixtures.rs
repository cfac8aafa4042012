//! Common test fixtures for DEM fetch tests.
//!
//! Bounding boxes are `(min_lon, min_lat, max_lon, max_lat)` tuples so this
//! crate stays independent of the crates under test.

/// Common bounding box definitions for testing.
pub mod bbox {
    /// South-east Queensland, ~1.5 x 1.0 degrees. Needs many chunks at 5 m.
    pub const SEQ_REGION: (f64, f64, f64, f64) = (152.0, -28.0, 153.5, -27.0);

    /// Brisbane CBD, 0.1 x 0.1 degrees. A single request at 30 m.
    pub const BRISBANE_CBD: (f64, f64, f64, f64) = (152.95, -27.5, 153.05, -27.4);

    /// Small square used for synthetic 2x2 mosaics.
    pub const UNIT_SQUARE: (f64, f64, f64, f64) = (153.0, -28.0, 154.0, -27.0);

    /// Inverted bbox (min > max)
    pub const INVALID: (f64, f64, f64, f64) = (153.0, -27.0, 152.0, -28.0);
}

/// Resolutions of the built-in sources, in metres per pixel.
pub mod resolution {
    pub const LIDAR_5M: f64 = 5.0;
    pub const NATIONAL_1S: f64 = 30.0;
}

/// Planning scenarios with their expected outcomes.
pub mod scenarios {
    use super::bbox;

    pub struct PlanScenario {
        pub name: &'static str,
        pub bbox: (f64, f64, f64, f64),
        pub resolution_m: f64,
        pub max_request_px: u32,
        pub expected_grid: u32,
    }

    /// 1.5 x 1.0 degrees at 5 m: 33300 x 22200 px, 9 x 9 requests of 3700 x 2467.
    pub const LARGE_AREA: PlanScenario = PlanScenario {
        name: "seq_region_5m",
        bbox: bbox::SEQ_REGION,
        resolution_m: 5.0,
        max_request_px: 4000,
        expected_grid: 9,
    };

    /// 0.1 x 0.1 degrees at 30 m: 370 x 370 px in one request.
    pub const SMALL_AREA: PlanScenario = PlanScenario {
        name: "brisbane_cbd_30m",
        bbox: bbox::BRISBANE_CBD,
        resolution_m: 30.0,
        max_request_px: 4000,
        expected_grid: 1,
    };

    pub const ALL: &[PlanScenario] = &[LARGE_AREA, SMALL_AREA];
}
