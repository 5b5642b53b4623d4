//! Reference-area datasets held in memory, loaded from GeoJSON files.

use crate::domain::ports::ReferenceAreaStore;
use crate::utils::error::{Result, SiteGeoError};
use async_trait::async_trait;
use geo::{BoundingRect, Intersects, MultiPolygon, Polygon, Rect};
use geojson::GeoJson;
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_NAME_PROPERTY: &str = "name";

#[derive(Debug, Clone)]
pub struct ReferenceArea {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    bounds: Rect<f64>,
}

impl ReferenceArea {
    pub fn new(name: impl Into<String>, geometry: MultiPolygon<f64>) -> Option<Self> {
        let bounds = geometry.bounding_rect()?;
        Some(Self {
            name: name.into(),
            geometry,
            bounds,
        })
    }
}

/// Named, read-only collections of `{name, geometry}` areas.
#[derive(Debug, Clone, Default)]
pub struct GeoJsonAreaStore {
    datasets: HashMap<String, Vec<ReferenceArea>>,
}

impl GeoJsonAreaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file<P: AsRef<Path>>(&mut self, dataset: &str, path: P, name_property: &str) -> Result<usize> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| SiteGeoError::ConfigError {
            message: format!("cannot read dataset '{}' from {}: {}", dataset, path.as_ref().display(), e),
        })?;
        self.load_json(dataset, &json, name_property)
    }

    /// Adds every polygon feature of a FeatureCollection to `dataset`.
    ///
    /// Features without a string name or without polygonal geometry are
    /// skipped. Returns the number of areas loaded.
    pub fn load_json(&mut self, dataset: &str, json: &str, name_property: &str) -> Result<usize> {
        let geojson: GeoJson = json.parse()?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(SiteGeoError::ConfigError {
                message: format!("dataset '{}' is not a FeatureCollection", dataset),
            });
        };

        let mut areas = Vec::new();
        for (index, feature) in collection.features.into_iter().enumerate() {
            let Some(name) = feature.property(name_property).and_then(|v| v.as_str()).map(str::to_string) else {
                tracing::warn!("Dataset '{}' feature {} has no '{}' property", dataset, index, name_property);
                continue;
            };
            let Some(geometry) = feature.geometry else {
                continue;
            };
            match polygonal(geometry.value).and_then(|g| ReferenceArea::new(name, g)) {
                Some(area) => areas.push(area),
                None => tracing::warn!("Dataset '{}' feature {} is not a polygon, skipped", dataset, index),
            }
        }

        let count = areas.len();
        self.datasets.entry(dataset.to_string()).or_default().extend(areas);
        tracing::info!(dataset, count, "Loaded reference areas");
        Ok(count)
    }

    pub fn dataset_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.datasets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn polygonal(value: geojson::Value) -> Option<MultiPolygon<f64>> {
    let polygon: std::result::Result<Polygon<f64>, _> = value.clone().try_into();
    if let Ok(polygon) = polygon {
        return Some(MultiPolygon::new(vec![polygon]));
    }
    value.try_into().ok()
}

#[async_trait]
impl ReferenceAreaStore for GeoJsonAreaStore {
    async fn is_empty(&self, dataset: &str) -> Result<bool> {
        Ok(self.datasets.get(dataset).map_or(true, Vec::is_empty))
    }

    async fn intersecting_names(&self, dataset: &str, geometry: &geo::Geometry<f64>) -> Result<Vec<String>> {
        let Some(areas) = self.datasets.get(dataset) else {
            return Ok(Vec::new());
        };
        let Some(query_bounds) = geometry.bounding_rect() else {
            return Ok(Vec::new());
        };

        Ok(areas
            .iter()
            .filter(|area| area.bounds.intersects(&query_bounds))
            .filter(|area| geometry.intersects(&area.geometry))
            .map(|area| area.name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    const ZONES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"name": "Inshore"}, "geometry": {
                "type": "Polygon",
                "coordinates": [[[-1.0, 52.0], [-0.9, 52.0], [-0.9, 52.1], [-1.0, 52.1], [-1.0, 52.0]]]
            }},
            {"type": "Feature", "properties": {"name": "Offshore"}, "geometry": {
                "type": "MultiPolygon",
                "coordinates": [[[[1.0, 52.0], [1.1, 52.0], [1.1, 52.1], [1.0, 52.0]]]]
            }},
            {"type": "Feature", "properties": {"label": "nameless"}, "geometry": {
                "type": "Point", "coordinates": [0.0, 0.0]
            }},
            {"type": "Feature", "properties": {"name": "Marker"}, "geometry": {
                "type": "Point", "coordinates": [0.0, 0.0]
            }}
        ]
    }"#;

    #[tokio::test]
    async fn test_load_and_query() {
        let mut store = GeoJsonAreaStore::new();
        assert_eq!(store.load_json("zones", ZONES, DEFAULT_NAME_PROPERTY).unwrap(), 2);
        assert!(!store.is_empty("zones").await.unwrap());
        assert!(store.is_empty("other").await.unwrap());

        let inside = geo::Geometry::Point(Point::new(-0.95, 52.05));
        assert_eq!(store.intersecting_names("zones", &inside).await.unwrap(), vec!["Inshore".to_string()]);

        let nowhere = geo::Geometry::Point(Point::new(10.0, 10.0));
        assert!(store.intersecting_names("zones", &nowhere).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_name_property() {
        let json = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"ZONE_NAME": "Estuary"}, "geometry": {
                "type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
            }}
        ]}"#;
        let mut store = GeoJsonAreaStore::new();
        store.load_json("estuaries", json, "ZONE_NAME").unwrap();
        assert_eq!(store.dataset_names(), vec!["estuaries"]);
    }

    #[test]
    fn test_non_collection_rejected() {
        let mut store = GeoJsonAreaStore::new();
        let err = store
            .load_json("zones", r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#, "name")
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let mut store = GeoJsonAreaStore::new();
        let err = store.load_file("zones", "/nonexistent/zones.geojson", "name").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
