//! Conversions between map regions and geographic bounding boxes
//!
//! A [`Region`] is what a map widget reports: a center plus angular half-spans.
//! A [`BoundingBox`] is what the clustering index understands. Everything here
//! is pure and works in degrees.

use crate::{ClusterError, Result};
use geo::{Coord, Rect};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Padding factor applied by [`region_from_points`]
pub const EXPANSION_FACTOR: f64 = 2.0;

/// Smallest delta a normalized region may carry, in degrees
pub const MIN_DELTA: f64 = 1e-6;

const MAX_LONGITUDE_DELTA: f64 = 180.0;
const MAX_LATITUDE_DELTA: f64 = 90.0;

/// Map viewport: center coordinate plus angular half-span on each axis
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Region {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    /// Negative only when the viewport wrapped the antimeridian
    pub longitude_delta: f64,
}

impl Region {
    pub fn new(latitude: f64, longitude: f64, latitude_delta: f64, longitude_delta: f64) -> Self {
        Self {
            latitude,
            longitude,
            latitude_delta,
            longitude_delta,
        }
    }

    /// Center as a (lon, lat) coordinate
    #[inline]
    pub fn center(&self) -> Coord<f64> {
        Coord {
            x: self.longitude,
            y: self.latitude,
        }
    }

    #[inline]
    pub fn to_bounding_box(&self) -> BoundingBox {
        region_to_bounding_box(self)
    }

    /// Repair a region coming from live gesture state
    ///
    /// Never fails: non-finite centers collapse to 0, the center is clamped and
    /// wrapped into range, a negative longitude delta is unwrapped across the
    /// antimeridian, degenerate deltas become [`MIN_DELTA`] and oversized or
    /// infinite deltas are capped at the axis maximum.
    pub fn normalized(&self) -> Self {
        let mut region = *self;

        if !region.latitude.is_finite() {
            tracing::warn!("Non-finite region latitude {}, using 0", region.latitude);
            region.latitude = 0.0;
        }
        if !region.longitude.is_finite() {
            tracing::warn!("Non-finite region longitude {}, using 0", region.longitude);
            region.longitude = 0.0;
        }
        region.latitude = region.latitude.clamp(-90.0, 90.0);
        if !(-180.0..180.0).contains(&region.longitude) {
            region.longitude = (region.longitude + 180.0).rem_euclid(360.0) - 180.0;
        }

        region.latitude_delta =
            normalize_delta(region.latitude_delta.abs(), MAX_LATITUDE_DELTA, "latitude");

        let mut longitude_delta = region.longitude_delta;
        if longitude_delta.is_finite() && longitude_delta < 0.0 {
            longitude_delta = longitude_delta.rem_euclid(360.0);
        }
        region.longitude_delta = normalize_delta(longitude_delta, MAX_LONGITUDE_DELTA, "longitude");

        region
    }
}

fn normalize_delta(delta: f64, max: f64, axis: &str) -> f64 {
    if delta.is_nan() || delta == 0.0 {
        tracing::warn!("Degenerate {} delta {}, using {}", axis, delta, MIN_DELTA);
        MIN_DELTA
    } else if delta.is_infinite() || delta > max {
        tracing::warn!("Oversized {} delta {}, using {}", axis, delta, max);
        max
    } else {
        delta
    }
}

/// Axis-aligned geographic rectangle in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Smallest box containing all `points`, or `None` when empty
    pub fn from_points(points: &[Coord<f64>]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self::new(first.x, first.y, first.x, first.y);
        for point in &points[1..] {
            bbox.west = bbox.west.min(point.x);
            bbox.east = bbox.east.max(point.x);
            bbox.south = bbox.south.min(point.y);
            bbox.north = bbox.north.max(point.y);
        }
        Some(bbox)
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    #[inline]
    pub fn contains(&self, coord: Coord<f64>) -> bool {
        coord.x >= self.west && coord.x <= self.east && coord.y >= self.south && coord.y <= self.north
    }

    /// Convert to a `geo::Rect` (x = longitude, y = latitude)
    #[inline]
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

/// Bounding box covered by a region
///
/// A negative longitude delta is unwrapped modulo 360 degrees first.
pub fn region_to_bounding_box(region: &Region) -> BoundingBox {
    let longitude_delta = if region.longitude_delta < 0.0 {
        region.longitude_delta.rem_euclid(360.0)
    } else {
        region.longitude_delta
    };

    BoundingBox {
        west: region.longitude - longitude_delta,
        south: region.latitude - region.latitude_delta,
        east: region.longitude + longitude_delta,
        north: region.latitude + region.latitude_delta,
    }
}

/// Region centered on the spherical midpoint of the box's corners
///
/// The deltas of the returned region are the full angular spans of the box.
pub fn bounding_box_to_region(bbox: &BoundingBox) -> Region {
    let min_lon = bbox.west.to_radians();
    let max_lon = bbox.east.to_radians();
    let min_lat = bbox.south.to_radians();
    let max_lat = bbox.north.to_radians();

    let d_lon = max_lon - min_lon;
    let d_lat = max_lat - min_lat;

    let x = max_lat.cos() * d_lon.cos();
    let y = max_lat.cos() * d_lon.sin();

    let lat_rad = (min_lat.sin() + max_lat.sin())
        .atan2(((min_lat.cos() + x).powi(2) + y * y).sqrt());
    let lon_rad = min_lon + y.atan2(min_lat.cos() + x);

    Region {
        latitude: lat_rad.to_degrees(),
        longitude: lon_rad.to_degrees(),
        latitude_delta: d_lat.to_degrees(),
        longitude_delta: d_lon.to_degrees(),
    }
}

/// Region enclosing a set of (lon, lat) coordinates with comfortable padding
pub fn region_from_points(points: &[Coord<f64>]) -> Result<Region> {
    let bbox = BoundingBox::from_points(points).ok_or(ClusterError::EmptyInput)?;

    Ok(Region {
        latitude: (bbox.south + bbox.north) / 2.0,
        longitude: (bbox.west + bbox.east) / 2.0,
        latitude_delta: bbox.height() * EXPANSION_FACTOR,
        longitude_delta: bbox.width() * EXPANSION_FACTOR,
    })
}
