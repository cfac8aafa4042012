//! Tests for BoundingBox parsing and geometry.

use dem_common::bbox::{BboxParseError, BoundingBox};

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_parse_with_whitespace() {
    let bbox = BoundingBox::parse(" 152.95, -27.5 ,153.05,-27.4").unwrap();
    assert!((bbox.min_lon - 152.95).abs() < 1e-12);
    assert!((bbox.max_lat - (-27.4)).abs() < 1e-12);
}

#[test]
fn test_parse_from_str() {
    let bbox: BoundingBox = "0,0,1,1".parse().unwrap();
    assert_eq!(bbox.width(), 1.0);
    assert_eq!(bbox.height(), 1.0);
}

#[test]
fn test_parse_wrong_count() {
    assert!(matches!(
        BoundingBox::parse("1,2,3"),
        Err(BboxParseError::InvalidFormat(_))
    ));
    assert!(matches!(
        BoundingBox::parse("1,2,3,4,5"),
        Err(BboxParseError::InvalidFormat(_))
    ));
}

#[test]
fn test_parse_bad_number() {
    assert_eq!(
        BoundingBox::parse("1,abc,3,4"),
        Err(BboxParseError::InvalidNumber("abc".to_string()))
    );
}

#[test]
fn test_non_finite_rejected() {
    assert_eq!(
        BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0),
        Err(BboxParseError::NonFinite)
    );
    assert_eq!(
        BoundingBox::new(0.0, 0.0, f64::INFINITY, 1.0),
        Err(BboxParseError::NonFinite)
    );
}

#[test]
fn test_deserialized_bbox_validates() {
    let bbox: BoundingBox = serde_json::from_str(
        r#"{"min_lon": 10.0, "min_lat": 0.0, "max_lon": 5.0, "max_lat": 1.0}"#,
    )
    .unwrap();
    assert!(bbox.validate().is_err());
}

// ============================================================================
// Geometry
// ============================================================================

#[test]
fn test_intersection_and_union() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
    let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0).unwrap();
    let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0).unwrap();

    assert!(a.intersects(&b));
    assert!(!a.intersects(&c));

    let i = a.intersection(&b).unwrap();
    assert_eq!((i.min_lon, i.min_lat, i.max_lon, i.max_lat), (5.0, 5.0, 10.0, 10.0));
    assert!(a.intersection(&c).is_none());

    let u = a.union(&c);
    assert_eq!((u.min_lon, u.min_lat, u.max_lon, u.max_lat), (0.0, 0.0, 30.0, 30.0));
}

#[test]
fn test_touching_edges_do_not_intersect() {
    let west = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
    let east = BoundingBox::new(1.0, 0.0, 2.0, 1.0).unwrap();
    assert!(!west.intersects(&east));
}

#[test]
fn test_within_wgs84() {
    assert!(BoundingBox::new(-180.0, -90.0, 180.0, 90.0).unwrap().within_wgs84());
    assert!(!BoundingBox::new(170.0, 0.0, 190.0, 1.0).unwrap().within_wgs84());
}

#[test]
fn test_query_string() {
    let bbox = BoundingBox::new(152.0, -28.0, 153.5, -27.0).unwrap();
    assert_eq!(bbox.to_query_string(), "152,-28,153.5,-27");
}
