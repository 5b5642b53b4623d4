use crate::core::circle::{circle_to_polygon, CircleOptions};
use crate::utils::error::{Result, SiteGeoError};
use geo::{
    BoundingRect, Coord, CoordsIter, GeodesicBearing, GeodesicDestination, Geometry, LineString,
    MultiPolygon, Point, Polygon,
};

pub const DEFAULT_BUFFER_METERS: f64 = 50.0;
const CAP_STEPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferOptions {
    pub distance_m: f64,
    /// Vertices used for the round cap around each input vertex.
    pub cap_steps: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            distance_m: DEFAULT_BUFFER_METERS,
            cap_steps: CAP_STEPS,
        }
    }
}

/// Expands `geometry` outward by a geodesic distance.
///
/// The result is the union of the input's own area, a disc around every
/// vertex and a band along every edge, kept as separate members of a
/// [`MultiPolygon`]. The members overlap, so the shape is only fit for
/// "intersects" style tests, not for area or boundary output.
pub fn buffer(geometry: &Geometry<f64>, options: &BufferOptions) -> Result<MultiPolygon<f64>> {
    if !(options.distance_m > 0.0) || !options.distance_m.is_finite() {
        return Err(failed(format!("buffer distance {} is not positive", options.distance_m)));
    }
    check_coordinates(geometry)?;

    let mut pieces = Vec::new();
    collect_pieces(geometry, options, &mut pieces)?;
    if pieces.is_empty() {
        return Err(failed("geometry has no coordinates"));
    }
    Ok(MultiPolygon::new(pieces))
}

fn failed(reason: impl Into<String>) -> SiteGeoError {
    SiteGeoError::BufferFailed {
        reason: reason.into(),
    }
}

fn check_coordinates(geometry: &Geometry<f64>) -> Result<()> {
    if geometry.bounding_rect().is_none() {
        return Err(failed("geometry is empty"));
    }
    for coord in geometry.coords_iter() {
        let in_range = coord.x.is_finite()
            && coord.y.is_finite()
            && (-180.0..=180.0).contains(&coord.x)
            && (-90.0..=90.0).contains(&coord.y);
        if !in_range {
            return Err(failed(format!(
                "coordinate ({}, {}) is not a valid longitude/latitude",
                coord.x, coord.y
            )));
        }
    }
    Ok(())
}

fn collect_pieces(
    geometry: &Geometry<f64>,
    options: &BufferOptions,
    pieces: &mut Vec<Polygon<f64>>,
) -> Result<()> {
    match geometry {
        Geometry::Point(point) => add_cap(point.0, options, pieces)?,
        Geometry::MultiPoint(points) => {
            for point in points {
                add_cap(point.0, options, pieces)?;
            }
        }
        Geometry::Line(line) => {
            add_path(&LineString::new(vec![line.start, line.end]), options, pieces)?
        }
        Geometry::LineString(line) => add_path(line, options, pieces)?,
        Geometry::MultiLineString(lines) => {
            for line in lines {
                add_path(line, options, pieces)?;
            }
        }
        Geometry::Polygon(polygon) => add_polygon(polygon, options, pieces)?,
        Geometry::MultiPolygon(polygons) => {
            for polygon in polygons {
                add_polygon(polygon, options, pieces)?;
            }
        }
        Geometry::Rect(rect) => add_polygon(&rect.to_polygon(), options, pieces)?,
        Geometry::Triangle(triangle) => add_polygon(&triangle.to_polygon(), options, pieces)?,
        Geometry::GeometryCollection(collection) => {
            for member in collection {
                collect_pieces(member, options, pieces)?;
            }
        }
    }
    Ok(())
}

fn add_polygon(
    polygon: &Polygon<f64>,
    options: &BufferOptions,
    pieces: &mut Vec<Polygon<f64>>,
) -> Result<()> {
    if polygon.exterior().0.len() >= 4 {
        pieces.push(polygon.clone());
    }
    add_path(polygon.exterior(), options, pieces)?;
    for hole in polygon.interiors() {
        add_path(hole, options, pieces)?;
    }
    Ok(())
}

fn add_path(
    line: &LineString<f64>,
    options: &BufferOptions,
    pieces: &mut Vec<Polygon<f64>>,
) -> Result<()> {
    for coord in line.coords() {
        add_cap(*coord, options, pieces)?;
    }
    for segment in line.lines() {
        if segment.start != segment.end {
            pieces.push(edge_band(segment.start, segment.end, options.distance_m));
        }
    }
    Ok(())
}

fn add_cap(center: Coord<f64>, options: &BufferOptions, pieces: &mut Vec<Polygon<f64>>) -> Result<()> {
    let ring = circle_to_polygon(
        [center.x, center.y],
        options.distance_m,
        &CircleOptions {
            steps: options.cap_steps,
        },
    )?;
    pieces.push(Polygon::new(ring, vec![]));
    Ok(())
}

/// Quadrilateral covering everything within `distance` of the segment.
fn edge_band(start: Coord<f64>, end: Coord<f64>, distance: f64) -> Polygon<f64> {
    let a = Point::from(start);
    let b = Point::from(end);
    let bearing_at_a = a.geodesic_bearing(b);
    let bearing_at_b = b.geodesic_bearing(a) + 180.0;

    let ring = vec![
        a.geodesic_destination(bearing_at_a - 90.0, distance).0,
        b.geodesic_destination(bearing_at_b - 90.0, distance).0,
        b.geodesic_destination(bearing_at_b + 90.0, distance).0,
        a.geodesic_destination(bearing_at_a + 90.0, distance).0,
        a.geodesic_destination(bearing_at_a - 90.0, distance).0,
    ];
    Polygon::new(LineString::new(ring), vec![])
}
