use crate::utils::error::{Result, SiteGeoError};
use geo::{LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two coordinate reference systems an applicant may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceSystem {
    /// Ordnance Survey National Grid, easting/northing in metres.
    Osgb36,
    /// Global latitude/longitude in decimal degrees.
    Wgs84,
}

impl FromStr for ReferenceSystem {
    type Err = SiteGeoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "osgb36" => Ok(ReferenceSystem::Osgb36),
            "wgs84" => Ok(ReferenceSystem::Wgs84),
            _ => Err(SiteGeoError::UnsupportedReferenceSystem {
                system: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ReferenceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSystem::Osgb36 => f.write_str("osgb36"),
            ReferenceSystem::Wgs84 => f.write_str("wgs84"),
        }
    }
}

/// A single position tagged with the system it is expressed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coordinate {
    Grid { easting: f64, northing: f64 },
    Geographic { latitude: f64, longitude: f64 },
}

impl Coordinate {
    pub fn system(&self) -> ReferenceSystem {
        match self {
            Coordinate::Grid { .. } => ReferenceSystem::Osgb36,
            Coordinate::Geographic { .. } => ReferenceSystem::Wgs84,
        }
    }
}

/// How a site's location was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatesType {
    File,
    Coordinates,
}

impl FromStr for CoordinatesType {
    type Err = SiteGeoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(CoordinatesType::File),
            "coordinates" => Ok(CoordinatesType::Coordinates),
            _ => Err(SiteGeoError::InvalidCoordinateEntry {
                entry: format!("coordinatesType '{}'", s),
            }),
        }
    }
}

/// Manual entry mode: a circle around one point, or a list of vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatesEntry {
    Single,
    Multiple,
}

impl FromStr for CoordinatesEntry {
    type Err = SiteGeoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(CoordinatesEntry::Single),
            "multiple" => Ok(CoordinatesEntry::Multiple),
            _ => Err(SiteGeoError::InvalidCoordinateEntry {
                entry: s.to_string(),
            }),
        }
    }
}

/// Raw manual coordinate payload as submitted by the applicant.
///
/// `coordinates` is either one point object (single entry) or an array of
/// point objects (multiple entry); values may be strings or numbers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatePayload {
    pub coordinate_system: Option<String>,
    pub coordinates: Option<serde_json::Value>,
    pub circle_width: Option<serde_json::Value>,
}

/// Reference to an uploaded geographic file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub storage_bucket: String,
    pub storage_key: String,
    pub declared_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Kml,
    Shapefile,
}

impl FromStr for FileFormat {
    type Err = SiteGeoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kml" => Ok(FileFormat::Kml),
            "shapefile" => Ok(FileFormat::Shapefile),
            _ => Err(SiteGeoError::UnsupportedFileFormat {
                format: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Kml => f.write_str("kml"),
            FileFormat::Shapefile => f.write_str("shapefile"),
        }
    }
}

/// One area of activity within a licensing application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDetails {
    pub coordinates_type: String,
    pub coordinates_entry: Option<String>,
    pub coordinates: Option<CoordinatePayload>,
    /// Feature collection extracted from the uploaded file, once known.
    pub geo_json: Option<serde_json::Value>,
    pub file: Option<FileRef>,
}

impl SiteDetails {
    pub fn kind(&self) -> Result<CoordinatesType> {
        self.coordinates_type.parse()
    }
}

/// Canonical shape of a manually entered site: a closed polygon, always in
/// WGS84 `[longitude, latitude]` order.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteGeometry(pub Polygon<f64>);

impl SiteGeometry {
    pub fn polygon(&self) -> &Polygon<f64> {
        &self.0
    }

    pub fn to_geo(&self) -> geo::Geometry<f64> {
        geo::Geometry::Polygon(self.0.clone())
    }

    pub fn to_geojson(&self) -> geojson::Geometry {
        geojson::Geometry::new(geojson::Value::from(&self.to_geo()))
    }

    /// The closed outer ring.
    pub fn outline(&self) -> &LineString<f64> {
        self.0.exterior()
    }
}

/// A reference area that one of the application's sites overlaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaMatch {
    pub site_index: usize,
    pub area_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialReference {
    pub code: u32,
}

/// Ring payload for the downstream planning system.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmpRings {
    pub rings: Vec<Vec<[f64; 2]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial_reference: Option<SpatialReference>,
}
