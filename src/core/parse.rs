//! Format parsers executed inside the isolated parse worker.
//!
//! Nothing here is trusted to terminate quickly or stay small, which is why
//! the parent only ever talks to it through [`WorkerMessage`] on a pipe.

use crate::core::convert::to_lon_lat;
use crate::domain::model::{Coordinate, FileFormat};
use crate::utils::error::ParseErrorCode;
use geojson::{Feature, FeatureCollection, JsonObject, Value as GeoValue};
use serde::{Deserialize, Serialize};
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Shape};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

const SHAPEFILE_PARTS: &[&str] = &["shp", "shx", "dbf", "prj", "cpg"];
const REQUIRED_SHAPEFILE_PARTS: &[&str] = &["shp", "shx", "dbf"];

/// The single message a worker writes to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkerMessage {
    Ok {
        #[serde(rename = "featureCollection")]
        feature_collection: serde_json::Value,
    },
    /// The file itself is defective.
    Error {
        code: ParseErrorCode,
        message: String,
    },
    /// The worker could not do its job for reasons unrelated to the file.
    Fault { message: String },
}

#[derive(Debug)]
pub enum ParseFailure {
    Rejected {
        code: ParseErrorCode,
        message: String,
    },
    Io(io::Error),
}

impl ParseFailure {
    fn rejected(code: ParseErrorCode, message: impl Into<String>) -> Self {
        ParseFailure::Rejected {
            code,
            message: message.into(),
        }
    }
}

impl From<io::Error> for ParseFailure {
    fn from(e: io::Error) -> Self {
        ParseFailure::Io(e)
    }
}

type ParseResult<T> = std::result::Result<T, ParseFailure>;

/// Worker entry point: parse and package the outcome as a message.
pub fn run_worker(
    format: FileFormat,
    input: &Path,
    workdir: &Path,
    max_unpacked_bytes: u64,
) -> WorkerMessage {
    let outcome = parse_file(format, input, workdir, max_unpacked_bytes).and_then(|collection| {
        serde_json::to_value(&collection).map_err(|e| ParseFailure::Io(io::Error::other(e)))
    });

    match outcome {
        Ok(feature_collection) => WorkerMessage::Ok { feature_collection },
        Err(ParseFailure::Rejected { code, message }) => WorkerMessage::Error { code, message },
        Err(ParseFailure::Io(e)) => WorkerMessage::Fault {
            message: e.to_string(),
        },
    }
}

pub fn parse_file(
    format: FileFormat,
    input: &Path,
    workdir: &Path,
    max_unpacked_bytes: u64,
) -> ParseResult<FeatureCollection> {
    match format {
        FileFormat::Kml => parse_kml(input, max_unpacked_bytes),
        FileFormat::Shapefile => parse_shapefile(input, workdir, max_unpacked_bytes),
    }
}

fn parse_kml(input: &Path, max_unpacked_bytes: u64) -> ParseResult<FeatureCollection> {
    let bytes = std::fs::read(input)?;

    let text = if bytes.starts_with(b"PK") {
        read_kmz_document(&bytes, max_unpacked_bytes)?
    } else {
        String::from_utf8(bytes)
            .map_err(|_| ParseFailure::rejected(ParseErrorCode::InvalidKml, "file is not UTF-8 text"))?
    };

    let document: kml::Kml<f64> = text
        .parse()
        .map_err(|e: kml::Error| ParseFailure::rejected(ParseErrorCode::InvalidKml, e.to_string()))?;

    let mut features = Vec::new();
    collect_kml_features(document, &mut features)?;
    tracing::debug!("KML yielded {} features", features.len());

    Ok(feature_collection(features))
}

fn read_kmz_document(bytes: &[u8], max_unpacked_bytes: u64) -> ParseResult<String> {
    let mut archive = ZipArchive::new(io::Cursor::new(bytes))
        .map_err(|e| ParseFailure::rejected(ParseErrorCode::InvalidArchive, e.to_string()))?;

    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| ParseFailure::rejected(ParseErrorCode::InvalidArchive, e.to_string()))?;
        let is_kml = entry
            .enclosed_name()
            .and_then(|name| extension_of(&name))
            .is_some_and(|ext| ext == "kml");
        if entry.is_dir() || !is_kml {
            continue;
        }

        let mut text = String::new();
        entry
            .take(max_unpacked_bytes + 1)
            .read_to_string(&mut text)
            .map_err(|_| ParseFailure::rejected(ParseErrorCode::InvalidKml, "KMZ document is not UTF-8 text"))?;
        if text.len() as u64 > max_unpacked_bytes {
            return Err(ParseFailure::rejected(
                ParseErrorCode::ArchiveTooLarge,
                format!("KMZ document exceeds {} bytes", max_unpacked_bytes),
            ));
        }
        return Ok(text);
    }

    Err(ParseFailure::rejected(
        ParseErrorCode::MissingCoreFiles,
        "KMZ archive contains no .kml document",
    ))
}

/// Walks documents and folders; each placemark becomes features carrying
/// its name and description.
fn collect_kml_features(node: kml::Kml<f64>, features: &mut Vec<Feature>) -> ParseResult<()> {
    let invalid = |e: kml::Error| ParseFailure::rejected(ParseErrorCode::InvalidKml, e.to_string());

    match node {
        kml::Kml::KmlDocument(document) => {
            for element in document.elements {
                collect_kml_features(element, features)?;
            }
        }
        kml::Kml::Document { elements, .. } | kml::Kml::Folder { elements, .. } => {
            for element in elements {
                collect_kml_features(element, features)?;
            }
        }
        kml::Kml::Placemark(placemark) => {
            let Some(geometry) = placemark.geometry else {
                return Ok(());
            };
            let geometry = geo::Geometry::try_from(geometry).map_err(invalid)?;

            let mut properties = JsonObject::new();
            if let Some(name) = placemark.name {
                properties.insert("name".to_string(), serde_json::Value::String(name));
            }
            if let Some(description) = placemark.description {
                properties.insert("description".to_string(), serde_json::Value::String(description));
            }
            flatten_geometries(vec![geometry], &properties, features);
        }
        // Bare geometry outside a placemark; styles and other elements yield nothing.
        other => {
            let geometries = Vec::<geo::Geometry<f64>>::try_from(other).map_err(invalid)?;
            flatten_geometries(geometries, &JsonObject::new(), features);
        }
    }
    Ok(())
}

fn flatten_geometries(
    geometries: Vec<geo::Geometry<f64>>,
    properties: &JsonObject,
    features: &mut Vec<Feature>,
) {
    for geometry in geometries {
        match geometry {
            geo::Geometry::GeometryCollection(nested) => {
                flatten_geometries(nested.0, properties, features)
            }
            other => features.push(feature(GeoValue::from(&other), Some(properties.clone()))),
        }
    }
}

fn parse_shapefile(
    input: &Path,
    workdir: &Path,
    max_unpacked_bytes: u64,
) -> ParseResult<FeatureCollection> {
    let layer = unpack_shapefile(input, workdir, max_unpacked_bytes)?;
    let grid = layer.is_british_national_grid()?;

    let mut reader = shapefile::Reader::from_path(&layer.shp)
        .map_err(|e| ParseFailure::rejected(ParseErrorCode::InvalidShapefile, e.to_string()))?;

    let mut features = Vec::new();
    for item in reader.iter_shapes_and_records() {
        let (shape, record) = item
            .map_err(|e| ParseFailure::rejected(ParseErrorCode::InvalidShapefile, e.to_string()))?;
        if let Some(value) = shape_value(shape, grid)? {
            features.push(feature(value, Some(record_properties(record))));
        }
    }

    tracing::debug!(
        "Shapefile yielded {} features (national grid: {})",
        features.len(),
        grid
    );
    Ok(feature_collection(features))
}

/// The files of one shapefile layer unpacked into the work area.
struct ShapefileLayer {
    shp: PathBuf,
    prj: Option<PathBuf>,
}

impl ShapefileLayer {
    fn is_british_national_grid(&self) -> ParseResult<bool> {
        let Some(prj) = &self.prj else {
            return Ok(false);
        };
        let wkt = std::fs::read_to_string(prj)?.to_ascii_uppercase();
        Ok(wkt.contains("BRITISH_NATIONAL_GRID")
            || wkt.contains("OSGB_1936")
            || wkt.contains("OSGB 1936")
            || wkt.contains("OSGB36"))
    }
}

fn unpack_shapefile(
    input: &Path,
    workdir: &Path,
    max_unpacked_bytes: u64,
) -> ParseResult<ShapefileLayer> {
    let mut archive = ZipArchive::new(File::open(input)?)
        .map_err(|e| ParseFailure::rejected(ParseErrorCode::InvalidArchive, e.to_string()))?;

    // stem -> extension -> entry index
    let mut layers: BTreeMap<String, HashMap<String, usize>> = BTreeMap::new();
    let mut declared_total: u64 = 0;

    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| ParseFailure::rejected(ParseErrorCode::InvalidArchive, e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            tracing::warn!("Skipping archive entry with unsafe name: {:?}", entry.name());
            continue;
        };
        if name.components().any(|c| c.as_os_str() == "__MACOSX") {
            continue;
        }
        let (Some(stem), Some(ext)) = (
            name.file_stem().and_then(|s| s.to_str()).map(str::to_string),
            extension_of(&name),
        ) else {
            continue;
        };
        if !SHAPEFILE_PARTS.contains(&ext.as_str()) {
            continue;
        }

        declared_total = declared_total.saturating_add(entry.size());
        layers.entry(stem).or_default().insert(ext, index);
    }

    if declared_total > max_unpacked_bytes {
        return Err(ParseFailure::rejected(
            ParseErrorCode::ArchiveTooLarge,
            format!(
                "archive unpacks to {} bytes, limit is {}",
                declared_total, max_unpacked_bytes
            ),
        ));
    }

    let with_shp: Vec<&String> = layers
        .iter()
        .filter(|(_, parts)| parts.contains_key("shp"))
        .map(|(stem, _)| stem)
        .collect();
    if with_shp.len() > 1 {
        return Err(ParseFailure::rejected(
            ParseErrorCode::MultipleLayers,
            format!("archive holds {} .shp layers", with_shp.len()),
        ));
    }

    let (stem, parts) = match with_shp.first() {
        Some(stem) => (stem.to_string(), &layers[*stem]),
        None => {
            return Err(ParseFailure::rejected(
                ParseErrorCode::MissingCoreFiles,
                "archive contains no .shp file",
            ))
        }
    };

    let missing: Vec<&str> = REQUIRED_SHAPEFILE_PARTS
        .iter()
        .copied()
        .filter(|ext| !parts.contains_key(*ext))
        .collect();
    if !missing.is_empty() {
        return Err(ParseFailure::rejected(
            ParseErrorCode::MissingCoreFiles,
            format!("layer '{}' is missing .{}", stem, missing.join(", .")),
        ));
    }

    let target_dir = workdir.join("layer");
    std::fs::create_dir_all(&target_dir)?;

    let mut remaining = max_unpacked_bytes;
    let mut paths: HashMap<String, PathBuf> = HashMap::new();
    for (ext, index) in parts {
        let entry = archive
            .by_index(*index)
            .map_err(|e| ParseFailure::rejected(ParseErrorCode::InvalidArchive, e.to_string()))?;
        let path = target_dir.join(format!("layer.{}", ext));
        let mut out = File::create(&path)?;
        // Declared sizes can lie; cap what is actually inflated.
        let written = io::copy(&mut entry.take(remaining + 1), &mut out)?;
        if written > remaining {
            return Err(ParseFailure::rejected(
                ParseErrorCode::ArchiveTooLarge,
                format!("archive unpacks to more than {} bytes", max_unpacked_bytes),
            ));
        }
        remaining -= written;
        paths.insert(ext.clone(), path);
    }

    Ok(ShapefileLayer {
        shp: paths.remove("shp").unwrap_or_else(|| target_dir.join("layer.shp")),
        prj: paths.remove("prj"),
    })
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn shape_value(shape: Shape, grid: bool) -> ParseResult<Option<GeoValue>> {
    let position = |x: f64, y: f64| -> Vec<f64> {
        if grid {
            to_lon_lat(&Coordinate::Grid {
                easting: x,
                northing: y,
            })
            .to_vec()
        } else {
            vec![x, y]
        }
    };

    macro_rules! polygon {
        ($p:expr) => {
            polygon_value(
                $p.rings()
                    .iter()
                    .map(|ring| {
                        let coords = ring.points().iter().map(|pt| position(pt.x, pt.y)).collect();
                        (matches!(ring, PolygonRing::Outer(_)), coords)
                    })
                    .collect(),
            )
        };
    }
    macro_rules! polyline {
        ($l:expr) => {
            line_value(
                $l.parts()
                    .iter()
                    .map(|part| part.iter().map(|pt| position(pt.x, pt.y)).collect())
                    .collect(),
            )
        };
    }
    macro_rules! multipoint {
        ($m:expr) => {
            GeoValue::MultiPoint($m.points().iter().map(|pt| position(pt.x, pt.y)).collect())
        };
    }

    let value = match shape {
        Shape::NullShape => return Ok(None),
        Shape::Point(pt) => GeoValue::Point(position(pt.x, pt.y)),
        Shape::PointM(pt) => GeoValue::Point(position(pt.x, pt.y)),
        Shape::PointZ(pt) => GeoValue::Point(position(pt.x, pt.y)),
        Shape::Polyline(l) => polyline!(l),
        Shape::PolylineM(l) => polyline!(l),
        Shape::PolylineZ(l) => polyline!(l),
        Shape::Polygon(p) => polygon!(p),
        Shape::PolygonM(p) => polygon!(p),
        Shape::PolygonZ(p) => polygon!(p),
        Shape::Multipoint(m) => multipoint!(m),
        Shape::MultipointM(m) => multipoint!(m),
        Shape::MultipointZ(m) => multipoint!(m),
        Shape::Multipatch(_) => {
            return Err(ParseFailure::rejected(
                ParseErrorCode::UnsupportedGeometry,
                "multipatch shapes are not supported",
            ))
        }
    };
    Ok(Some(value))
}

/// Groups rings into polygons: each outer ring opens a polygon and inner
/// rings attach to the most recent one.
fn polygon_value(rings: Vec<(bool, Vec<Vec<f64>>)>) -> GeoValue {
    let mut polygons: Vec<Vec<Vec<Vec<f64>>>> = Vec::new();
    for (outer, ring) in rings {
        match polygons.last_mut() {
            Some(polygon) if !outer => polygon.push(ring),
            _ => polygons.push(vec![ring]),
        }
    }
    if polygons.len() == 1 {
        GeoValue::Polygon(polygons.remove(0))
    } else {
        GeoValue::MultiPolygon(polygons)
    }
}

fn line_value(mut parts: Vec<Vec<Vec<f64>>>) -> GeoValue {
    if parts.len() == 1 {
        GeoValue::LineString(parts.remove(0))
    } else {
        GeoValue::MultiLineString(parts)
    }
}

fn record_properties(record: Record) -> JsonObject {
    let fields: HashMap<String, FieldValue> = record.into();
    fields
        .into_iter()
        .map(|(name, value)| {
            let json = match value {
                FieldValue::Character(Some(s)) => serde_json::Value::String(s.trim().to_string()),
                FieldValue::Numeric(Some(n)) => serde_json::json!(n),
                FieldValue::Float(Some(n)) => serde_json::json!(n),
                FieldValue::Integer(n) => serde_json::json!(n),
                FieldValue::Double(n) => serde_json::json!(n),
                FieldValue::Logical(Some(b)) => serde_json::Value::Bool(b),
                FieldValue::Character(None)
                | FieldValue::Numeric(None)
                | FieldValue::Float(None)
                | FieldValue::Logical(None) => serde_json::Value::Null,
                other => serde_json::Value::String(format!("{:?}", other)),
            };
            (name, json)
        })
        .collect()
}

fn feature(value: GeoValue, properties: Option<JsonObject>) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(value)),
        id: None,
        properties,
        foreign_members: None,
    }
}

fn feature_collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
