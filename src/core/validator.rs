use crate::utils::error::{Result, SiteGeoError};
use serde_json::Value;
use std::io;

pub const DEFAULT_MAX_FEATURES: usize = 10_000;
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 524_288_000;

const GEOMETRY_TYPES: &[&str] = &[
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
    "GeometryCollection",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_features: usize,
    pub max_payload_bytes: u64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_features: DEFAULT_MAX_FEATURES,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Checks worker output before it is trusted.
///
/// The value must be a Feature or FeatureCollection whose features and
/// geometries are structurally sound, and its serialized size must fit the
/// configured ceiling. A lone Feature is normalized into a collection.
pub fn validate(value: &Value, limits: &ValidationLimits) -> Result<Value> {
    let object = value.as_object().ok_or_else(|| invalid("top-level value is not an object"))?;

    let collection = match object.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            let features = object
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("FeatureCollection has no features array"))?;
            if features.len() > limits.max_features {
                return Err(invalid(format!(
                    "{} features exceeds limit of {}",
                    features.len(),
                    limits.max_features
                )));
            }
            for (index, feature) in features.iter().enumerate() {
                validate_feature(feature).map_err(|reason| invalid(format!("feature {}: {}", index, reason)))?;
            }
            value.clone()
        }
        Some("Feature") => {
            validate_feature(value).map_err(invalid)?;
            serde_json::json!({ "type": "FeatureCollection", "features": [value] })
        }
        Some(other) => return Err(invalid(format!("unexpected type '{}'", other))),
        None => return Err(invalid("missing type member")),
    };

    let size = serialized_size(&collection)?;
    if size > limits.max_payload_bytes {
        return Err(SiteGeoError::PayloadTooLarge {
            size,
            limit: limits.max_payload_bytes,
        });
    }
    tracing::debug!("Validated feature collection of {} bytes", size);

    Ok(collection)
}

fn invalid(reason: impl Into<String>) -> SiteGeoError {
    SiteGeoError::InvalidGeoJson {
        reason: reason.into(),
    }
}

fn validate_feature(feature: &Value) -> std::result::Result<(), String> {
    let object = feature.as_object().ok_or("not an object")?;
    if object.get("type").and_then(Value::as_str) != Some("Feature") {
        return Err("type is not Feature".to_string());
    }
    match object.get("properties") {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => return Err("properties must be an object or null".to_string()),
    }
    match object.get("geometry") {
        None | Some(Value::Null) => Ok(()),
        Some(geometry) => validate_geometry(geometry),
    }
}

fn validate_geometry(geometry: &Value) -> std::result::Result<(), String> {
    let object = geometry.as_object().ok_or("geometry is not an object")?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or("geometry has no type")?;
    if !GEOMETRY_TYPES.contains(&kind) {
        return Err(format!("unknown geometry type '{}'", kind));
    }

    if kind == "GeometryCollection" {
        let members = object
            .get("geometries")
            .and_then(Value::as_array)
            .ok_or("GeometryCollection has no geometries array")?;
        return members.iter().try_for_each(validate_geometry);
    }

    let coordinates = object
        .get("coordinates")
        .ok_or_else(|| format!("{} has no coordinates", kind))?;
    let depth = match kind {
        "Point" => 0,
        "MultiPoint" | "LineString" => 1,
        "MultiLineString" | "Polygon" => 2,
        _ => 3,
    };
    check_positions(coordinates, depth).map_err(|reason| format!("{}: {}", kind, reason))
}

fn check_positions(value: &Value, depth: usize) -> std::result::Result<(), String> {
    let items = value.as_array().ok_or("coordinates must be arrays")?;
    if depth == 0 {
        if items.len() < 2 {
            return Err("position needs at least two numbers".to_string());
        }
        if !items.iter().all(|n| n.as_f64().is_some_and(f64::is_finite)) {
            return Err("position contains a non-numeric value".to_string());
        }
        return Ok(());
    }
    items.iter().try_for_each(|item| check_positions(item, depth - 1))
}

/// Counts serialized bytes without materializing the string.
fn serialized_size(value: &Value) -> Result<u64> {
    let mut counter = ByteCounter(0);
    serde_json::to_writer(&mut counter, value)?;
    Ok(counter.0)
}

struct ByteCounter(u64);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
