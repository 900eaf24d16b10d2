//! Utility functions for Web Mercator projection
//!
//! The index and the zoom resolver both work in "unit space": Web Mercator
//! scaled so the whole world is the square `[0, 1] x [0, 1]`, with `y = 0` at
//! the north edge. Unit space multiplied by `TILE_SIZE * 2^zoom` is the pixel
//! space of a standard slippy map at that zoom.

use geo::{Coord, Point};

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = 20037508.34;
pub const EARTH_MERCATOR_MIN: f64 = -20037508.34;
pub const EARTH_SIZE_METERS: f64 = EARTH_MERCATOR_MAX - EARTH_MERCATOR_MIN;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Edge length of a map tile in pixels
pub const TILE_SIZE: f64 = 256.0;

/// Precomputed constant: EARTH_MERCATOR_MAX / 180.0
const LON_TO_X_FACTOR: f64 = EARTH_MERCATOR_MAX / 180.0;

/// Precomputed constant: EARTH_MERCATOR_MAX / PI
const Y_FACTOR: f64 = EARTH_MERCATOR_MAX / std::f64::consts::PI;

/// Precomputed constant: 180.0 / EARTH_MERCATOR_MAX
const X_TO_LON_FACTOR: f64 = 180.0 / EARTH_MERCATOR_MAX;

/// Precomputed constant: PI / EARTH_MERCATOR_MAX
const Y_TO_LAT_FACTOR: f64 = std::f64::consts::PI / EARTH_MERCATOR_MAX;

/// Convert WGS84 (lat, lon) to Web Mercator (x, y) in meters
///
/// Latitude is clamped to the representable Web Mercator range.
#[inline(always)]
pub fn wgs84_to_mercator(lat: f64, lon: f64) -> Point<f64> {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

    let x = lon * LON_TO_X_FACTOR;
    let lat_rad = lat.to_radians();
    let y = (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() * Y_FACTOR;

    Point::new(x, y)
}

/// Convert Web Mercator (x, y) in meters to WGS84 (lat, lon)
#[inline(always)]
pub fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = x * X_TO_LON_FACTOR;
    let lat =
        (std::f64::consts::PI / 2.0 - 2.0 * ((-y * Y_TO_LAT_FACTOR).exp()).atan()).to_degrees();
    (lat, lon)
}

/// Longitude in degrees to unit-space x (not clamped, so wrapped longitudes
/// beyond ±180 map outside `[0, 1]`)
#[inline(always)]
pub fn lon_to_unit_x(lon: f64) -> f64 {
    lon / 360.0 + 0.5
}

/// Latitude in degrees to unit-space y, clamped to `[0, 1]`
#[inline(always)]
pub fn lat_to_unit_y(lat: f64) -> f64 {
    let y = wgs84_to_mercator(lat, 0.0).y();
    ((EARTH_MERCATOR_MAX - y) / EARTH_SIZE_METERS).clamp(0.0, 1.0)
}

#[inline(always)]
pub fn unit_x_to_lon(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

#[inline(always)]
pub fn unit_y_to_lat(y: f64) -> f64 {
    let (lat, _) = mercator_to_wgs84(0.0, EARTH_MERCATOR_MAX - y * EARTH_SIZE_METERS);
    lat
}

/// Project a (lon, lat) coordinate into unit space
#[inline(always)]
pub fn project_unit(coord: Coord<f64>) -> Coord<f64> {
    Coord {
        x: lon_to_unit_x(coord.x),
        y: lat_to_unit_y(coord.y),
    }
}

/// Inverse of [`project_unit`]
#[inline(always)]
pub fn unproject_unit(unit: Coord<f64>) -> Coord<f64> {
    Coord {
        x: unit_x_to_lon(unit.x),
        y: unit_y_to_lat(unit.y),
    }
}

/// Size of the whole world in pixels at a (possibly fractional) zoom level
#[inline(always)]
pub fn world_size_pixels(zoom: f64) -> f64 {
    TILE_SIZE * zoom.exp2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wgs84_to_mercator_origin() {
        let point = wgs84_to_mercator(0.0, 0.0);
        assert!((point.x() - 0.0).abs() < 0.01);
        assert!((point.y() - 0.0).abs() < 0.01);
    }

    #[test]
    fn test_mercator_to_wgs84_roundtrip() {
        let mercator = wgs84_to_mercator(51.5074, -0.1278);
        let (lat, lon) = mercator_to_wgs84(mercator.x(), mercator.y());
        assert!((lat - 51.5074).abs() < 0.0001);
        assert!((lon + 0.1278).abs() < 0.0001);
    }

    #[test]
    fn test_unit_space_corners() {
        assert!((lon_to_unit_x(-180.0)).abs() < 1e-12);
        assert!((lon_to_unit_x(180.0) - 1.0).abs() < 1e-12);
        assert!((lat_to_unit_y(0.0) - 0.5).abs() < 1e-9);
        assert!(lat_to_unit_y(MAX_LATITUDE) < 1e-6);
        assert!((lat_to_unit_y(-MAX_LATITUDE) - 1.0).abs() < 1e-6);
        // Poles clamp instead of diverging
        assert!(lat_to_unit_y(90.0) < 1e-6);
        assert!((lat_to_unit_y(-90.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_roundtrip() {
        let coord = Coord { x: 54.1, y: -1.2 };
        let back = unproject_unit(project_unit(coord));
        assert!((back.x - coord.x).abs() < 1e-9);
        assert!((back.y - coord.y).abs() < 1e-6);
    }

    #[test]
    fn test_world_size_pixels() {
        assert_eq!(world_size_pixels(0.0), 256.0);
        assert_eq!(world_size_pixels(3.0), 2048.0);
    }
}
