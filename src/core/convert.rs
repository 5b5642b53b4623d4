//! Conversion between the OSGB36 National Grid and WGS84.
//!
//! The transformation is a fixed definition: Airy 1830 ellipsoid, the
//! National Grid transverse Mercator projection and a seven-parameter
//! Helmert shift to WGS84 (the same parameters as the EPSG:27700 `towgs84`
//! definition). It is a `const`, so every caller shares the same immutable
//! values and a given input always produces bit-identical output.

use crate::domain::model::{Coordinate, ReferenceSystem};

const ARC_SECONDS_TO_RADIANS: f64 = std::f64::consts::PI / (180.0 * 3600.0);
const MAX_ITERATIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub semi_major: f64,
    pub semi_minor: f64,
}

impl Ellipsoid {
    fn eccentricity_squared(&self) -> f64 {
        1.0 - (self.semi_minor * self.semi_minor) / (self.semi_major * self.semi_major)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercator {
    pub scale_factor: f64,
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

/// Seven-parameter similarity transform (position vector convention).
/// Translations in metres, rotations in arc-seconds, scale in ppm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Helmert {
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
    pub scale_ppm: f64,
}

impl Helmert {
    fn inverse(&self) -> Helmert {
        Helmert {
            tx: -self.tx,
            ty: -self.ty,
            tz: -self.tz,
            rx: -self.rx,
            ry: -self.ry,
            rz: -self.rz,
            scale_ppm: -self.scale_ppm,
        }
    }

    fn apply(&self, [x, y, z]: [f64; 3]) -> [f64; 3] {
        let rx = self.rx * ARC_SECONDS_TO_RADIANS;
        let ry = self.ry * ARC_SECONDS_TO_RADIANS;
        let rz = self.rz * ARC_SECONDS_TO_RADIANS;
        let s = 1.0 + self.scale_ppm * 1e-6;

        [
            self.tx + x * s - y * rz + z * ry,
            self.ty + x * rz + y * s - z * rx,
            self.tz - x * ry + y * rx + z * s,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transformation {
    pub version: &'static str,
    pub grid_ellipsoid: Ellipsoid,
    pub projection: TransverseMercator,
    pub to_global: Helmert,
    pub global_ellipsoid: Ellipsoid,
}

pub const AIRY_1830: Ellipsoid = Ellipsoid {
    semi_major: 6_377_563.396,
    semi_minor: 6_356_256.909,
};

pub const WGS84: Ellipsoid = Ellipsoid {
    semi_major: 6_378_137.0,
    semi_minor: 6_356_752.314_245,
};

pub const NATIONAL_GRID: TransverseMercator = TransverseMercator {
    scale_factor: 0.999_601_271_7,
    origin_latitude: 49.0,
    origin_longitude: -2.0,
    false_easting: 400_000.0,
    false_northing: -100_000.0,
};

pub const OSGB36_TO_WGS84: Transformation = Transformation {
    version: "osgb36-helmert-epsg27700-v1",
    grid_ellipsoid: AIRY_1830,
    projection: NATIONAL_GRID,
    to_global: Helmert {
        tx: 446.448,
        ty: -125.157,
        tz: 542.06,
        rx: 0.15,
        ry: 0.247,
        rz: 0.842,
        scale_ppm: -20.489,
    },
    global_ellipsoid: WGS84,
};

/// Converts `coordinate` into `to`, producing a new tagged value.
pub fn convert(coordinate: &Coordinate, to: ReferenceSystem) -> Coordinate {
    OSGB36_TO_WGS84.convert(coordinate, to)
}

/// The `[longitude, latitude]` pair of `coordinate` in WGS84.
pub fn to_lon_lat(coordinate: &Coordinate) -> [f64; 2] {
    match *coordinate {
        Coordinate::Geographic {
            latitude,
            longitude,
        } => [longitude, latitude],
        Coordinate::Grid { easting, northing } => {
            let (latitude, longitude) = OSGB36_TO_WGS84.grid_to_global(easting, northing);
            [longitude, latitude]
        }
    }
}

impl Transformation {
    pub fn convert(&self, coordinate: &Coordinate, to: ReferenceSystem) -> Coordinate {
        match (*coordinate, to) {
            (Coordinate::Grid { easting, northing }, ReferenceSystem::Wgs84) => {
                let (latitude, longitude) = self.grid_to_global(easting, northing);
                Coordinate::Geographic {
                    latitude,
                    longitude,
                }
            }
            (
                Coordinate::Geographic {
                    latitude,
                    longitude,
                },
                ReferenceSystem::Osgb36,
            ) => {
                let (easting, northing) = self.global_to_grid(latitude, longitude);
                Coordinate::Grid { easting, northing }
            }
            (same, _) => same,
        }
    }

    /// Grid easting/northing to WGS84 latitude/longitude in degrees.
    pub fn grid_to_global(&self, easting: f64, northing: f64) -> (f64, f64) {
        let (phi, lambda) = self.unproject(easting, northing);
        let cartesian = to_cartesian(&self.grid_ellipsoid, phi, lambda);
        let shifted = self.to_global.apply(cartesian);
        let (phi, lambda) = from_cartesian(&self.global_ellipsoid, shifted);
        (phi.to_degrees(), lambda.to_degrees())
    }

    /// WGS84 latitude/longitude in degrees to grid easting/northing.
    pub fn global_to_grid(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let cartesian = to_cartesian(
            &self.global_ellipsoid,
            latitude.to_radians(),
            longitude.to_radians(),
        );
        let shifted = self.to_global.inverse().apply(cartesian);
        let (phi, lambda) = from_cartesian(&self.grid_ellipsoid, shifted);
        self.project(phi, lambda)
    }

    fn meridional_arc(&self, phi: f64) -> f64 {
        let Ellipsoid {
            semi_major: a,
            semi_minor: b,
        } = self.grid_ellipsoid;
        let n = (a - b) / (a + b);
        let (n2, n3) = (n * n, n * n * n);
        let phi0 = self.projection.origin_latitude.to_radians();
        let (dp, sp) = (phi - phi0, phi + phi0);

        let ma = (1.0 + n + 1.25 * n2 + 1.25 * n3) * dp;
        let mb = (3.0 * n + 3.0 * n2 + 2.625 * n3) * dp.sin() * sp.cos();
        let mc = (1.875 * n2 + 1.875 * n3) * (2.0 * dp).sin() * (2.0 * sp).cos();
        let md = (35.0 / 24.0) * n3 * (3.0 * dp).sin() * (3.0 * sp).cos();

        b * self.projection.scale_factor * (ma - mb + mc - md)
    }

    fn radii(&self, phi: f64) -> (f64, f64, f64) {
        let a = self.grid_ellipsoid.semi_major;
        let e2 = self.grid_ellipsoid.eccentricity_squared();
        let f0 = self.projection.scale_factor;
        let denom = 1.0 - e2 * phi.sin() * phi.sin();
        let nu = a * f0 / denom.sqrt();
        let rho = a * f0 * (1.0 - e2) / denom.powf(1.5);
        let eta2 = nu / rho - 1.0;
        (nu, rho, eta2)
    }

    fn unproject(&self, easting: f64, northing: f64) -> (f64, f64) {
        let tm = &self.projection;
        let a = self.grid_ellipsoid.semi_major;
        let lambda0 = tm.origin_longitude.to_radians();

        let mut phi = tm.origin_latitude.to_radians();
        let mut m = 0.0;
        for _ in 0..MAX_ITERATIONS {
            phi += (northing - tm.false_northing - m) / (a * tm.scale_factor);
            m = self.meridional_arc(phi);
            // NaN input falls straight through.
            if !((northing - tm.false_northing - m).abs() >= 1e-5) {
                break;
            }
        }

        let (nu, rho, eta2) = self.radii(phi);
        let (cos_phi, tan_phi) = (phi.cos(), phi.tan());
        let t2 = tan_phi * tan_phi;
        let t4 = t2 * t2;
        let t6 = t4 * t2;

        let vii = tan_phi / (2.0 * rho * nu);
        let viii = tan_phi / (24.0 * rho * nu.powi(3)) * (5.0 + 3.0 * t2 + eta2 - 9.0 * t2 * eta2);
        let ix = tan_phi / (720.0 * rho * nu.powi(5)) * (61.0 + 90.0 * t2 + 45.0 * t4);
        let x = 1.0 / (cos_phi * nu);
        let xi = 1.0 / (cos_phi * 6.0 * nu.powi(3)) * (nu / rho + 2.0 * t2);
        let xii = 1.0 / (cos_phi * 120.0 * nu.powi(5)) * (5.0 + 28.0 * t2 + 24.0 * t4);
        let xiia = 1.0 / (cos_phi * 5040.0 * nu.powi(7))
            * (61.0 + 662.0 * t2 + 1320.0 * t4 + 720.0 * t6);

        let de = easting - tm.false_easting;
        let latitude = phi - vii * de.powi(2) + viii * de.powi(4) - ix * de.powi(6);
        let longitude = lambda0 + x * de - xi * de.powi(3) + xii * de.powi(5) - xiia * de.powi(7);
        (latitude, longitude)
    }

    fn project(&self, phi: f64, lambda: f64) -> (f64, f64) {
        let tm = &self.projection;
        let (nu, rho, eta2) = self.radii(phi);
        let (sin_phi, cos_phi, tan_phi) = (phi.sin(), phi.cos(), phi.tan());
        let t2 = tan_phi * tan_phi;
        let t4 = t2 * t2;

        let m = self.meridional_arc(phi);
        let i = m + tm.false_northing;
        let ii = nu / 2.0 * sin_phi * cos_phi;
        let iii = nu / 24.0 * sin_phi * cos_phi.powi(3) * (5.0 - t2 + 9.0 * eta2);
        let iiia = nu / 720.0 * sin_phi * cos_phi.powi(5) * (61.0 - 58.0 * t2 + t4);
        let iv = nu * cos_phi;
        let v = nu / 6.0 * cos_phi.powi(3) * (nu / rho - t2);
        let vi = nu / 120.0
            * cos_phi.powi(5)
            * (5.0 - 18.0 * t2 + t4 + 14.0 * eta2 - 58.0 * t2 * eta2);

        let dl = lambda - tm.origin_longitude.to_radians();
        let northing = i + ii * dl.powi(2) + iii * dl.powi(4) + iiia * dl.powi(6);
        let easting = tm.false_easting + iv * dl + v * dl.powi(3) + vi * dl.powi(5);
        (easting, northing)
    }
}

fn to_cartesian(ellipsoid: &Ellipsoid, phi: f64, lambda: f64) -> [f64; 3] {
    let e2 = ellipsoid.eccentricity_squared();
    let nu = ellipsoid.semi_major / (1.0 - e2 * phi.sin() * phi.sin()).sqrt();
    [
        nu * phi.cos() * lambda.cos(),
        nu * phi.cos() * lambda.sin(),
        nu * (1.0 - e2) * phi.sin(),
    ]
}

fn from_cartesian(ellipsoid: &Ellipsoid, [x, y, z]: [f64; 3]) -> (f64, f64) {
    let e2 = ellipsoid.eccentricity_squared();
    let p = (x * x + y * y).sqrt();
    let mut phi = z.atan2(p * (1.0 - e2));
    for _ in 0..MAX_ITERATIONS {
        let nu = ellipsoid.semi_major / (1.0 - e2 * phi.sin() * phi.sin()).sqrt();
        let next = (z + e2 * nu * phi.sin()).atan2(p);
        let delta = (next - phi).abs();
        phi = next;
        if !(delta >= 1e-12) {
            break;
        }
    }
    (phi, y.atan2(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unproject_matches_ordnance_survey_worked_example() {
        // OS "A guide to coordinate systems in Great Britain", annex C.
        let (phi, lambda) = OSGB36_TO_WGS84.unproject(651_409.903, 313_177.270);
        let lat = phi.to_degrees();
        let lon = lambda.to_degrees();
        assert!((lat - (52.0 + 39.0 / 60.0 + 27.2531 / 3600.0)).abs() < 1e-7, "lat {}", lat);
        assert!((lon - (1.0 + 43.0 / 60.0 + 4.5177 / 3600.0)).abs() < 1e-7, "lon {}", lon);
    }

    #[test]
    fn test_grid_to_wgs84_reference_point() {
        let [lon, lat] = to_lon_lat(&Coordinate::Grid {
            easting: 513_967.0,
            northing: 476_895.0,
        });
        assert!((lon - -0.255_485_7).abs() < 1e-6, "lon {}", lon);
        assert!((lat - 54.175_195_4).abs() < 1e-6, "lat {}", lat);
    }

    #[test]
    fn test_conversion_is_bit_identical_across_calls() {
        let coordinate = Coordinate::Grid {
            easting: 513_967.0,
            northing: 476_895.0,
        };
        let first = to_lon_lat(&coordinate);
        let second = to_lon_lat(&coordinate);
        assert_eq!(first[0].to_bits(), second[0].to_bits());
        assert_eq!(first[1].to_bits(), second[1].to_bits());
    }

    #[test]
    fn test_wgs84_passthrough_keeps_order() {
        let [lon, lat] = to_lon_lat(&Coordinate::Geographic {
            latitude: 51.489676,
            longitude: -0.23153,
        });
        assert_eq!(lon, -0.23153);
        assert_eq!(lat, 51.489676);
    }

    #[test]
    fn test_round_trip_through_grid() {
        let start = Coordinate::Grid {
            easting: 430_000.0,
            northing: 565_000.0,
        };
        let global = convert(&start, ReferenceSystem::Wgs84);
        assert_eq!(global.system(), ReferenceSystem::Wgs84);

        match convert(&global, ReferenceSystem::Osgb36) {
            Coordinate::Grid { easting, northing } => {
                assert!((easting - 430_000.0).abs() < 0.01, "easting {}", easting);
                assert!((northing - 565_000.0).abs() < 0.01, "northing {}", northing);
            }
            other => panic!("expected grid coordinate, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_input_terminates() {
        let [lon, lat] = to_lon_lat(&Coordinate::Grid {
            easting: f64::NAN,
            northing: f64::NAN,
        });
        assert!(lon.is_nan() || lat.is_nan());
    }
}
