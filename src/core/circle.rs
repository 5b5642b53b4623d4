use crate::utils::error::{Result, SiteGeoError};
use geo::{Coord, GeodesicDestination, LineString, Point};

pub const DEFAULT_CIRCLE_STEPS: usize = 64;
pub const MIN_CIRCLE_STEPS: usize = 3;

/// Angular resolution of circle discretization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircleOptions {
    pub steps: usize,
}

impl Default for CircleOptions {
    fn default() -> Self {
        Self {
            steps: DEFAULT_CIRCLE_STEPS,
        }
    }
}

/// Approximates the circle of `radius_m` metres around `center`
/// (`[longitude, latitude]`) with a closed ring of `steps` distinct vertices.
///
/// Vertices are geodesic destinations from the center, walked
/// counter-clockwise starting due north, so the radius holds at any latitude.
pub fn circle_to_polygon(
    center: [f64; 2],
    radius_m: f64,
    options: &CircleOptions,
) -> Result<LineString<f64>> {
    if !(radius_m > 0.0) || !radius_m.is_finite() {
        return Err(SiteGeoError::InvalidRadius {
            value: radius_m.to_string(),
        });
    }
    if !center.iter().all(|v| v.is_finite()) {
        return Err(SiteGeoError::InvalidCoordinateValue {
            field: "center".to_string(),
            value: format!("{:?}", center),
            reason: "coordinates must be finite".to_string(),
        });
    }

    let steps = options.steps.max(MIN_CIRCLE_STEPS);
    let origin = Point::new(center[0], center[1]);

    let mut coords: Vec<Coord<f64>> = (0..steps)
        .map(|i| {
            let bearing = -360.0 * i as f64 / steps as f64;
            origin.geodesic_destination(bearing, radius_m).0
        })
        .collect();
    coords.push(coords[0]);

    Ok(LineString::new(coords))
}
