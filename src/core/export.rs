use crate::core::manual::ManualGeometryBuilder;
use crate::domain::model::{CoordinatesType, EmpRings, SiteDetails, SpatialReference};
use crate::utils::error::Result;
use serde_json::Value;

/// ETRS89, the datum the downstream planning system expects.
pub const DEFAULT_EXPORT_WKID: u32 = 4258;

/// Converts sites into the ring payload handed to the planning system.
#[derive(Debug, Clone)]
pub struct RingExporter {
    builder: ManualGeometryBuilder,
    wkid: u32,
}

impl RingExporter {
    pub fn new(builder: ManualGeometryBuilder, wkid: u32) -> Self {
        Self { builder, wkid }
    }

    /// Rings of every site, in site order then feature order.
    ///
    /// No rings at all yields an empty payload without a spatial reference.
    pub fn to_rings(&self, sites: &[SiteDetails]) -> Result<EmpRings> {
        let mut rings: Vec<Vec<[f64; 2]>> = Vec::new();

        for site in sites {
            match site.kind()? {
                CoordinatesType::Coordinates => {
                    let geometry = self.builder.build(site)?;
                    rings.push(geometry.outline().coords().map(|c| [c.x, c.y]).collect());
                }
                CoordinatesType::File => {
                    if let Some(collection) = &site.geo_json {
                        collection_rings(collection, &mut rings);
                    }
                }
            }
        }

        let spatial_reference = (!rings.is_empty()).then_some(SpatialReference { code: self.wkid });
        tracing::debug!("Exported {} rings from {} sites", rings.len(), sites.len());
        Ok(EmpRings {
            rings,
            spatial_reference,
        })
    }
}

fn collection_rings(collection: &Value, rings: &mut Vec<Vec<[f64; 2]>>) {
    let features: Vec<&Value> = match collection.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => collection
            .get("features")
            .and_then(Value::as_array)
            .map(|features| features.iter().collect())
            .unwrap_or_default(),
        Some("Feature") => vec![collection],
        _ => Vec::new(),
    };

    for feature in features {
        if let Some(geometry) = feature.get("geometry") {
            geometry_rings(geometry, rings);
        }
    }
}

/// Polygon rings and line paths; points carry no ring and are dropped.
fn geometry_rings(geometry: &Value, rings: &mut Vec<Vec<[f64; 2]>>) {
    let coordinates = geometry.get("coordinates");
    match geometry.get("type").and_then(Value::as_str) {
        Some("LineString") => rings.extend(coordinates.and_then(path)),
        Some("MultiLineString") | Some("Polygon") => {
            rings.extend(coordinates.into_iter().flat_map(paths));
        }
        Some("MultiPolygon") => {
            let polygons = coordinates.and_then(Value::as_array).into_iter().flatten();
            rings.extend(polygons.flat_map(paths));
        }
        Some("GeometryCollection") => {
            let members = geometry.get("geometries").and_then(Value::as_array);
            for member in members.into_iter().flatten() {
                geometry_rings(member, rings);
            }
        }
        _ => {}
    }
}

fn paths(value: &Value) -> Vec<Vec<[f64; 2]>> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(path).collect())
        .unwrap_or_default()
}

fn path(value: &Value) -> Option<Vec<[f64; 2]>> {
    let positions = value.as_array()?;
    let path: Vec<[f64; 2]> = positions
        .iter()
        .filter_map(|position| {
            let x = position.get(0)?.as_f64()?;
            let y = position.get(1)?.as_f64()?;
            Some([x, y])
        })
        .collect();
    (!path.is_empty()).then_some(path)
}
