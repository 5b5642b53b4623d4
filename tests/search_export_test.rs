use geo::{GeodesicDestination, Point};
use serde_json::json;
use site_geometry::adapters::{GeoJsonAreaStore, LocalObjectStore};
use site_geometry::core::buffer::BufferOptions;
use site_geometry::core::export::DEFAULT_EXPORT_WKID;
use site_geometry::core::extract::ExtractorSettings;
use site_geometry::core::resolver::site_shapes;
use site_geometry::core::sandbox::WorkerCommand;
use site_geometry::domain::model::{AreaMatch, CoordinatePayload, SiteDetails};
use site_geometry::{
    AreaSearch, FileGeometryExtractor, ManualGeometryBuilder, RingExporter, SiteGeometryResolver,
};
use tempfile::TempDir;

const ZONES: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "properties": {"name": "Harbour"}, "geometry": {
            "type": "Polygon",
            "coordinates": [[[-1.0, 52.0], [-0.9, 52.0], [-0.9, 52.1], [-1.0, 52.1], [-1.0, 52.0]]]
        }},
        {"type": "Feature", "properties": {"name": "Far Bank"}, "geometry": {
            "type": "Polygon",
            "coordinates": [[[2.0, 55.0], [2.1, 55.0], [2.1, 55.1], [2.0, 55.0]]]
        }}
    ]
}"#;

fn circle_site(lon: f64, lat: f64) -> SiteDetails {
    SiteDetails {
        coordinates_type: "coordinates".to_string(),
        coordinates_entry: Some("single".to_string()),
        coordinates: Some(CoordinatePayload {
            coordinate_system: Some("wgs84".to_string()),
            coordinates: Some(json!({
                "latitude": format!("{:.6}", lat),
                "longitude": format!("{:.6}", lon)
            })),
            circle_width: Some(json!("20")),
        }),
        ..SiteDetails::default()
    }
}

fn file_site(geo_json: serde_json::Value) -> SiteDetails {
    SiteDetails {
        coordinates_type: "file".to_string(),
        geo_json: Some(geo_json),
        ..SiteDetails::default()
    }
}

fn resolver(storage: &TempDir) -> SiteGeometryResolver<LocalObjectStore> {
    let worker = WorkerCommand::new("false", Vec::new());
    let extractor = FileGeometryExtractor::new(LocalObjectStore::new(storage.path()), ExtractorSettings::new(worker));
    SiteGeometryResolver::new(ManualGeometryBuilder::default(), extractor)
}

fn area_store() -> GeoJsonAreaStore {
    let mut store = GeoJsonAreaStore::new();
    store.load_json("zones", ZONES, "name").unwrap();
    store
        .load_json("empty", r#"{"type": "FeatureCollection", "features": []}"#, "name")
        .unwrap();
    store
}

#[tokio::test]
async fn test_search_reports_each_area_once() {
    let storage = TempDir::new().unwrap();
    // 30 m west of the harbour edge: only the 50 m buffer reaches it.
    let near = Point::new(-1.0, 52.05).geodesic_destination(270.0, 30.0);
    let mut sites = vec![
        circle_site(near.x(), near.y()),
        circle_site(-0.95, 52.05),
        file_site(json!({"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {
                "type": "LineString", "coordinates": [[-0.98, 52.01], [-0.97, 52.02]]
            }}
        ]})),
    ];

    let resolved = resolver(&storage).resolve_all(&mut sites).await.unwrap();
    let search = AreaSearch::new(area_store(), BufferOptions::default());
    let matches = search.search_sites(&site_shapes(&resolved), "zones").await.unwrap();

    assert_eq!(
        matches,
        vec![AreaMatch {
            site_index: 0,
            area_name: "Harbour".to_string()
        }]
    );
}

#[tokio::test]
async fn test_site_out_of_buffer_range_matches_nothing() {
    let storage = TempDir::new().unwrap();
    let distant = Point::new(-1.0, 52.05).geodesic_destination(270.0, 200.0);
    let mut sites = vec![circle_site(distant.x(), distant.y())];

    let resolved = resolver(&storage).resolve_all(&mut sites).await.unwrap();
    let search = AreaSearch::new(area_store(), BufferOptions::default());
    let matches = search.search_sites(&site_shapes(&resolved), "zones").await.unwrap();
    assert!(matches.is_empty());
}

#[tokio::test]
async fn test_empty_and_unknown_datasets() {
    let storage = TempDir::new().unwrap();
    let mut sites = vec![circle_site(-0.95, 52.05)];
    let resolved = resolver(&storage).resolve_all(&mut sites).await.unwrap();
    let shapes = site_shapes(&resolved);

    let search = AreaSearch::new(area_store(), BufferOptions::default());
    let datasets = vec!["empty".to_string(), "missing".to_string(), "zones".to_string()];
    let results = search.search_datasets(&shapes, &datasets).await.unwrap();

    assert!(results["empty"].is_empty());
    assert!(results["missing"].is_empty());
    assert_eq!(results["zones"].len(), 1);
}

#[test]
fn test_export_of_empty_file_sites_has_no_reference() {
    let exporter = RingExporter::new(ManualGeometryBuilder::default(), DEFAULT_EXPORT_WKID);
    let sites = vec![
        file_site(json!({"type": "FeatureCollection", "features": []})),
        file_site(json!({"type": "FeatureCollection", "features": []})),
    ];

    let payload = exporter.to_rings(&sites).unwrap();
    assert_eq!(serde_json::to_value(&payload).unwrap(), json!({"rings": []}));

    let nothing = exporter.to_rings(&[]).unwrap();
    assert!(nothing.rings.is_empty());
    assert!(nothing.spatial_reference.is_none());
}

#[test]
fn test_export_concatenates_manual_and_file_rings() {
    let exporter = RingExporter::new(ManualGeometryBuilder::default(), DEFAULT_EXPORT_WKID);
    let sites = vec![
        circle_site(-0.95, 52.05),
        file_site(json!({"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {
                "type": "Polygon",
                "coordinates": [
                    [[0.0, 50.0], [0.1, 50.0], [0.1, 50.1], [0.0, 50.0]],
                    [[0.02, 50.01], [0.05, 50.01], [0.05, 50.03], [0.02, 50.01]]
                ]
            }},
            {"type": "Feature", "properties": {}, "geometry": {
                "type": "Point", "coordinates": [0.5, 50.5]
            }}
        ]})),
    ];

    let payload = exporter.to_rings(&sites).unwrap();
    assert_eq!(payload.rings.len(), 3);
    assert_eq!(payload.rings[0].first(), payload.rings[0].last());
    assert_eq!(payload.rings[1][1], [0.1, 50.0]);
    assert_eq!(payload.rings[2][0], [0.02, 50.01]);

    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["spatialReference"]["code"], DEFAULT_EXPORT_WKID);
}
