//! Zoom level resolution
//!
//! Maps a bounding box shown in a pixel viewport to the integer zoom level of a
//! standard 256px-tile Web Mercator map, and back.

use crate::geo_math::{BoundingBox, Region};
use crate::utils::{
    TILE_SIZE, lat_to_unit_y, lon_to_unit_x, unit_x_to_lon, unit_y_to_lat, world_size_pixels,
};
use geo::Coord;

/// Longitude half-span at or above which a region counts as world-scale and
/// resolves straight to the minimum zoom
pub const WORLD_SCALE_LONGITUDE_DELTA: f64 = 40.0;

/// Integer zoom at which `bbox` fits a viewport of `screen_size` pixels,
/// clamped to `[min_zoom, max_zoom]`
///
/// World-scale boxes (see [`WORLD_SCALE_LONGITUDE_DELTA`]) skip the fitting
/// and resolve to `min_zoom`, since tile fitting is unreliable at that scale.
pub fn resolve_zoom(bbox: &BoundingBox, screen_size: (f64, f64), min_zoom: u8, max_zoom: u8) -> u8 {
    let max_zoom = max_zoom.max(min_zoom);

    if bbox.width() / 2.0 >= WORLD_SCALE_LONGITUDE_DELTA {
        return min_zoom;
    }

    clamp_zoom(fit_zoom(bbox, screen_size), min_zoom, max_zoom)
}

/// Fractional zoom at which `bbox` exactly fills `screen_size` on its
/// tighter axis
///
/// Returns `+inf` for a zero-area box and `-inf` for an empty viewport.
pub fn fit_zoom(bbox: &BoundingBox, screen_size: (f64, f64)) -> f64 {
    let (width, height) = screen_size;

    let fraction_x = bbox.width().abs() / 360.0;
    let fraction_y = (lat_to_unit_y(bbox.south) - lat_to_unit_y(bbox.north)).abs();

    let zoom_x = (width / (TILE_SIZE * fraction_x)).log2();
    let zoom_y = (height / (TILE_SIZE * fraction_y)).log2();

    zoom_x.min(zoom_y)
}

/// Floor a fractional zoom and clamp it into range; NaN resolves to `min_zoom`
#[inline]
pub fn clamp_zoom(zoom: f64, min_zoom: u8, max_zoom: u8) -> u8 {
    if zoom.is_nan() {
        return min_zoom;
    }
    zoom.floor().clamp(min_zoom as f64, max_zoom as f64) as u8
}

/// Bounding box visible in a viewport of `screen_size` pixels centered at
/// `center` (lon, lat) at the given zoom
pub fn bounds_at_zoom(center: Coord<f64>, zoom: f64, screen_size: (f64, f64)) -> BoundingBox {
    let world = world_size_pixels(zoom);
    let (width, height) = screen_size;

    let center_x = lon_to_unit_x(center.x) * world;
    let center_y = lat_to_unit_y(center.y) * world;

    BoundingBox {
        west: unit_x_to_lon((center_x - width / 2.0) / world),
        south: unit_y_to_lat((center_y + height / 2.0) / world),
        east: unit_x_to_lon((center_x + width / 2.0) / world),
        north: unit_y_to_lat((center_y - height / 2.0) / world),
    }
}

/// Whether two regions resolve to different zoom levels in the same viewport
pub fn is_zoom_level_changed(
    previous: &Region,
    current: &Region,
    screen_size: (f64, f64),
    min_zoom: u8,
    max_zoom: u8,
) -> bool {
    let previous_zoom = resolve_zoom(&previous.to_bounding_box(), screen_size, min_zoom, max_zoom);
    let current_zoom = resolve_zoom(&current.to_bounding_box(), screen_size, min_zoom, max_zoom);
    previous_zoom != current_zoom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_scale_returns_min_zoom() {
        let bbox = Region::new(0.0, 0.0, 10.0, 50.0).to_bounding_box();
        for screen_size in [(100.0, 100.0), (1080.0, 1920.0), (4000.0, 4000.0)] {
            assert_eq!(resolve_zoom(&bbox, screen_size, 3, 20), 3);
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let bbox = Region::new(0.0, 0.0, 1.0, 40.0).to_bounding_box();
        assert_eq!(resolve_zoom(&bbox, (1024.0, 1024.0), 2, 20), 2);
    }

    #[test]
    fn test_fit_known_value() {
        // 20x20 degrees around the origin in a single tile: ~18 boxes per world
        let bbox = BoundingBox::new(-10.0, -10.0, 10.0, 10.0);
        assert_eq!(resolve_zoom(&bbox, (256.0, 256.0), 0, 20), 4);
    }

    #[test]
    fn test_larger_screen_zooms_in() {
        let bbox = BoundingBox::new(2.2, 48.8, 2.5, 48.9);
        let small = resolve_zoom(&bbox, (320.0, 480.0), 0, 20);
        let large = resolve_zoom(&bbox, (2560.0, 1440.0), 0, 20);
        assert!(large > small);
    }

    #[test]
    fn test_zoom_is_always_within_range() {
        let boxes = [
            BoundingBox::new(0.0, 0.0, 0.0, 0.0),
            BoundingBox::new(-0.0001, -0.0001, 0.0001, 0.0001),
            BoundingBox::new(-30.0, -60.0, 30.0, 60.0),
            BoundingBox::new(170.0, -1.0, 190.0, 1.0),
            BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0),
        ];
        let screens = [(0.0, 0.0), (1.0, 1.0), (1080.0, 1920.0), (f64::NAN, 100.0)];
        for bbox in &boxes {
            for &screen in &screens {
                let zoom = resolve_zoom(bbox, screen, 2, 16);
                assert!((2..=16).contains(&zoom), "{:?} {:?} -> {}", bbox, screen, zoom);
            }
        }
    }

    #[test]
    fn test_inverted_range_does_not_panic() {
        let bbox = BoundingBox::new(-0.01, -0.01, 0.01, 0.01);
        assert_eq!(resolve_zoom(&bbox, (500.0, 500.0), 5, 3), 5);
    }

    #[test]
    fn test_bounds_at_zoom() {
        let bbox = bounds_at_zoom(Coord { x: 0.0, y: 0.0 }, 4.0, (256.0, 256.0));
        assert!((bbox.west + 11.25).abs() < 1e-9);
        assert!((bbox.east - 11.25).abs() < 1e-9);
        assert!((bbox.north + bbox.south).abs() < 1e-9);
        assert!(bbox.north > 0.0);
    }

    #[test]
    fn test_bounds_at_zoom_fits_back() {
        let center = Coord { x: 13.4, y: 52.5 };
        let bbox = bounds_at_zoom(center, 11.0, (800.0, 600.0));
        let zoom = fit_zoom(&bbox, (800.0, 600.0));
        assert!((zoom - 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_is_zoom_level_changed() {
        let previous = Region::new(48.85, 2.35, 0.05, 0.05);
        let panned = Region::new(48.86, 2.36, 0.05, 0.05);
        let zoomed = Region::new(48.85, 2.35, 0.005, 0.005);
        let screen = (1080.0, 1920.0);
        assert!(!is_zoom_level_changed(&previous, &panned, screen, 0, 20));
        assert!(is_zoom_level_changed(&previous, &zoomed, screen, 0, 20));
    }
}
