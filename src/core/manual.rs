use crate::core::circle::{circle_to_polygon, CircleOptions};
use crate::core::convert::to_lon_lat;
use crate::domain::model::{
    Coordinate, CoordinatePayload, CoordinatesEntry, CoordinatesType, FileFormat, ReferenceSystem,
    SiteDetails, SiteGeometry,
};
use crate::utils::error::{Result, SiteGeoError};
use crate::utils::validation::{
    validate_osgb36_component, validate_storage_key, validate_wgs84_component, Validate,
};
use geo::{Coord, LineString, Polygon};
use serde_json::Value;

/// Smallest number of vertices accepted for a multi-point site.
pub const MIN_POLYGON_VERTICES: usize = 3;

const LATITUDE_KEYS: &[&str] = &["latitude", "lat"];
const LONGITUDE_KEYS: &[&str] = &["longitude", "lng", "lon"];
const EASTING_KEYS: &[&str] = &["eastings", "easting"];
const NORTHING_KEYS: &[&str] = &["northings", "northing"];

/// Turns manually entered site coordinates into canonical WGS84 geometry.
#[derive(Debug, Clone, Default)]
pub struct ManualGeometryBuilder {
    circle: CircleOptions,
}

impl ManualGeometryBuilder {
    pub fn new(circle: CircleOptions) -> Self {
        Self { circle }
    }

    pub fn build(&self, site: &SiteDetails) -> Result<SiteGeometry> {
        let entry: CoordinatesEntry = site
            .coordinates_entry
            .as_deref()
            .ok_or_else(|| SiteGeoError::InvalidCoordinateEntry {
                entry: "<missing>".to_string(),
            })?
            .parse()?;

        let payload = site
            .coordinates
            .as_ref()
            .ok_or_else(|| SiteGeoError::MissingCoordinates {
                reason: "site has no coordinate payload".to_string(),
            })?;

        self.build_payload(entry, payload)
    }

    pub fn build_payload(
        &self,
        entry: CoordinatesEntry,
        payload: &CoordinatePayload,
    ) -> Result<SiteGeometry> {
        let system: ReferenceSystem = payload
            .coordinate_system
            .as_deref()
            .ok_or_else(|| SiteGeoError::MissingCoordinates {
                reason: "coordinateSystem is required".to_string(),
            })?
            .parse()?;

        let coordinates = payload
            .coordinates
            .as_ref()
            .filter(|value| !value.is_null())
            .ok_or_else(|| SiteGeoError::MissingCoordinates {
                reason: "coordinates are required".to_string(),
            })?;

        match entry {
            CoordinatesEntry::Single => {
                let width = payload.circle_width.as_ref().ok_or(SiteGeoError::MissingRadius)?;
                let radius = radius_from_width(width)?;
                let center = to_lon_lat(&parse_point(coordinates, system)?);
                let ring = circle_to_polygon(center, radius, &self.circle)?;
                tracing::debug!(
                    "Built circle of {} m radius with {} vertices",
                    radius,
                    ring.0.len()
                );
                Ok(SiteGeometry(Polygon::new(ring, vec![])))
            }
            CoordinatesEntry::Multiple => {
                let points = coordinates
                    .as_array()
                    .ok_or_else(|| SiteGeoError::MissingCoordinates {
                        reason: "multiple entry expects an array of points".to_string(),
                    })?;
                let mut coords = points
                    .iter()
                    .map(|point| {
                        let [x, y] = to_lon_lat(&parse_point(point, system)?);
                        Ok(Coord { x, y })
                    })
                    .collect::<Result<Vec<_>>>()?;
                close_ring(&mut coords);

                // A closed ring repeats its first vertex.
                let distinct = coords.len().saturating_sub(1);
                if distinct < MIN_POLYGON_VERTICES {
                    return Err(SiteGeoError::MissingCoordinates {
                        reason: format!(
                            "polygon needs at least {} distinct vertices, got {}",
                            MIN_POLYGON_VERTICES, distinct
                        ),
                    });
                }

                Ok(SiteGeometry(Polygon::new(LineString::new(coords), vec![])))
            }
        }
    }
}

/// Makes the ring's last vertex identical to its first.
///
/// A last vertex within machine epsilon of the first on both axes counts as
/// closing the ring and is snapped onto it; otherwise the first vertex is
/// appended.
pub fn close_ring(coords: &mut Vec<Coord<f64>>) {
    let Some(&first) = coords.first() else {
        return;
    };
    let last = coords.len() - 1;
    if last > 0 && nearly_equal(first, coords[last]) {
        coords[last] = first;
    } else {
        coords.push(first);
    }
}

fn nearly_equal(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() <= f64::EPSILON && (a.y - b.y).abs() <= f64::EPSILON
}

fn parse_point(value: &Value, system: ReferenceSystem) -> Result<Coordinate> {
    let object = value
        .as_object()
        .ok_or_else(|| SiteGeoError::MissingCoordinates {
            reason: "point must be an object".to_string(),
        })?;

    let field = |keys: &[&str]| -> Result<f64> {
        let (key, raw) = keys
            .iter()
            .find_map(|key| object.get(*key).map(|v| (*key, v)))
            .filter(|(_, v)| !v.is_null())
            .ok_or_else(|| SiteGeoError::MissingCoordinates {
                reason: format!("point is missing {}", keys[0]),
            })?;
        number_value(key, raw)
    };

    match system {
        ReferenceSystem::Wgs84 => Ok(Coordinate::Geographic {
            latitude: field(LATITUDE_KEYS)?,
            longitude: field(LONGITUDE_KEYS)?,
        }),
        ReferenceSystem::Osgb36 => Ok(Coordinate::Grid {
            easting: field(EASTING_KEYS)?,
            northing: field(NORTHING_KEYS)?,
        }),
    }
}

fn number_value(field: &str, raw: &Value) -> Result<f64> {
    let invalid = || SiteGeoError::InvalidCoordinateValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: "not a finite number".to_string(),
    };

    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).ok_or_else(invalid)
}

/// Circle width is a diameter in metres; the radius is half of it.
fn radius_from_width(width: &Value) -> Result<f64> {
    if width.is_null() || width.as_str().is_some_and(|s| s.trim().is_empty()) {
        return Err(SiteGeoError::MissingRadius);
    }
    let diameter = number_value("circleWidth", width).map_err(|_| SiteGeoError::InvalidRadius {
        value: width.to_string(),
    })?;
    if diameter <= 0.0 {
        return Err(SiteGeoError::InvalidRadius {
            value: width.to_string(),
        });
    }
    Ok(diameter / 2.0)
}

/// Request-boundary format rules, stricter than what [`ManualGeometryBuilder`]
/// needs to build: WGS84 values carry exactly six decimals and grid values
/// are 6 or 7 digit integers. File sites need a safe key and known format.
impl Validate for SiteDetails {
    fn validate(&self) -> Result<()> {
        match self.kind()? {
            CoordinatesType::File => match (&self.file, &self.geo_json) {
                (Some(file), _) => {
                    validate_storage_key(&file.storage_key)?;
                    file.declared_format.parse::<FileFormat>()?;
                    Ok(())
                }
                (None, Some(_)) => Ok(()),
                (None, None) => Err(SiteGeoError::MissingCoordinates {
                    reason: "file site has no file reference".to_string(),
                }),
            },
            CoordinatesType::Coordinates => {
                let payload = self.coordinates.as_ref().ok_or_else(|| SiteGeoError::MissingCoordinates {
                    reason: "site has no coordinate payload".to_string(),
                })?;
                let system: ReferenceSystem = payload
                    .coordinate_system
                    .as_deref()
                    .ok_or_else(|| SiteGeoError::MissingCoordinates {
                        reason: "coordinateSystem is required".to_string(),
                    })?
                    .parse()?;

                match payload.coordinates.as_ref() {
                    Some(Value::Array(points)) => points
                        .iter()
                        .try_for_each(|point| validate_point_format(point, system)),
                    Some(point) if !point.is_null() => validate_point_format(point, system),
                    _ => Err(SiteGeoError::MissingCoordinates {
                        reason: "coordinates are required".to_string(),
                    }),
                }
            }
        }
    }
}

fn validate_point_format(point: &Value, system: ReferenceSystem) -> Result<()> {
    let object = point.as_object().ok_or_else(|| SiteGeoError::MissingCoordinates {
        reason: "point must be an object".to_string(),
    })?;
    let text = |keys: &[&str]| -> Result<String> {
        match keys.iter().find_map(|key| object.get(*key)) {
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(SiteGeoError::MissingCoordinates {
                reason: format!("point is missing {}", keys[0]),
            }),
        }
    };

    match system {
        ReferenceSystem::Wgs84 => {
            validate_wgs84_component("latitude", &text(LATITUDE_KEYS)?, 90.0)?;
            validate_wgs84_component("longitude", &text(LONGITUDE_KEYS)?, 180.0)
        }
        ReferenceSystem::Osgb36 => {
            validate_osgb36_component("eastings", &text(EASTING_KEYS)?)?;
            validate_osgb36_component("northings", &text(NORTHING_KEYS)?)
        }
    }
}
