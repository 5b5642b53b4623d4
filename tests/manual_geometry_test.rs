use geo::{GeodesicDistance, Point};
use serde_json::json;
use site_geometry::core::circle::CircleOptions;
use site_geometry::core::convert::{convert, to_lon_lat};
use site_geometry::domain::model::{Coordinate, CoordinatePayload, ReferenceSystem, SiteDetails};
use site_geometry::ManualGeometryBuilder;

fn site(entry: &str, system: &str, coordinates: serde_json::Value, width: Option<&str>) -> SiteDetails {
    SiteDetails {
        coordinates_type: "coordinates".to_string(),
        coordinates_entry: Some(entry.to_string()),
        coordinates: Some(CoordinatePayload {
            coordinate_system: Some(system.to_string()),
            coordinates: Some(coordinates),
            circle_width: width.map(|w| json!(w)),
        }),
        ..SiteDetails::default()
    }
}

#[test]
fn test_single_point_site_becomes_ten_metre_circle() {
    let site = site(
        "single",
        "wgs84",
        json!({"latitude": "51.489676", "longitude": "-0.231530"}),
        Some("20"),
    );

    let geometry = ManualGeometryBuilder::default().build(&site).unwrap();
    let ring = geometry.polygon().exterior();
    assert!(ring.is_closed());
    assert_eq!(ring.0.first(), ring.0.last());

    let center = Point::new(-0.23153, 51.489676);
    for coord in ring.coords() {
        let distance = center.geodesic_distance(&Point::from(*coord));
        assert!((distance - 10.0).abs() < 1e-6, "vertex at {} m", distance);
    }
}

#[test]
fn test_grid_reference_converts_consistently() {
    let grid = Coordinate::Grid {
        easting: 513967.0,
        northing: 476895.0,
    };

    let first = to_lon_lat(&grid);
    let second = to_lon_lat(&grid);
    assert_eq!(first[0].to_bits(), second[0].to_bits());
    assert_eq!(first[1].to_bits(), second[1].to_bits());
    assert!((first[0] - -0.2554857).abs() < 1e-6);
    assert!((first[1] - 54.1751954).abs() < 1e-6);

    let Coordinate::Geographic { latitude, longitude } = convert(&grid, ReferenceSystem::Wgs84) else {
        panic!("expected geographic output");
    };
    assert_eq!(longitude.to_bits(), first[0].to_bits());
    assert_eq!(latitude.to_bits(), first[1].to_bits());
}

#[test]
fn test_grid_polygon_vertices_match_direct_conversion() {
    let vertices = json!([
        {"eastings": "513967", "northings": "476895"},
        {"eastings": "514967", "northings": "476895"},
        {"eastings": "514967", "northings": "477895"}
    ]);
    let geometry = ManualGeometryBuilder::default()
        .build(&site("multiple", "OSGB36", vertices, None))
        .unwrap();

    let outline: Vec<_> = geometry.outline().coords().copied().collect();
    assert_eq!(outline.len(), 4);
    assert_eq!(outline[0], outline[3]);

    let expected = to_lon_lat(&Coordinate::Grid {
        easting: 514967.0,
        northing: 477895.0,
    });
    assert_eq!([outline[2].x, outline[2].y], expected);
}

#[test]
fn test_rings_always_close() {
    let builder = ManualGeometryBuilder::new(CircleOptions { steps: 12 });
    let shapes = [
        json!([
            {"lat": "50.000000", "lng": "-4.000000"},
            {"lat": "50.100000", "lng": "-4.000000"},
            {"lat": "50.100000", "lng": "-3.900000"},
            {"lat": "50.000000", "lng": "-4.000000"}
        ]),
        json!([
            {"lat": "57.123456", "lng": "-2.654321"},
            {"lat": "57.223456", "lng": "-2.654321"},
            {"lat": "57.223456", "lng": "-2.554321"},
            {"lat": "57.123456", "lng": "-2.554321"}
        ]),
    ];

    for vertices in shapes {
        let geometry = builder.build(&site("multiple", "wgs84", vertices, None)).unwrap();
        let ring = geometry.outline();
        assert_eq!(ring.0.first(), ring.0.last());
        assert!(ring.0.len() >= 4);
    }
}

#[test]
fn test_invalid_sites_are_client_errors() {
    let cases = [
        (site("double", "wgs84", json!({}), None), "INVALID_COORDINATE_ENTRY"),
        (site("single", "etrs89", json!({"latitude": "1.000000"}), Some("10")), "UNSUPPORTED_REFERENCE_SYSTEM"),
        (
            site("single", "wgs84", json!({"latitude": "51.489676", "longitude": "-0.231530"}), None),
            "MISSING_RADIUS",
        ),
        (site("multiple", "wgs84", json!(null), None), "MISSING_COORDINATES"),
    ];

    let builder = ManualGeometryBuilder::default();
    for (site, code) in cases {
        let err = builder.build(&site).unwrap_err();
        assert_eq!(err.code(), code);
        assert!(err.is_client_error());
    }
}
