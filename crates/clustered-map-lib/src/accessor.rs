//! Coordinate extraction from dataset items
//!
//! An [`Accessor`] says where an item's position lives: either a dotted field
//! path evaluated on the item's serde representation, or a plain function. It
//! is resolved once into a [`ResolvedAccessor`] that every later stage uses.

use crate::{ClusterError, Result};
use geo::Coord;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type AccessorFn<T> = dyn Fn(&T) -> Option<Coord<f64>> + Send + Sync;
type ResolvedFn<T> = dyn Fn(&T) -> Result<Coord<f64>> + Send + Sync;

const LATITUDE_KEYS: [&str; 2] = ["latitude", "lat"];
const LONGITUDE_KEYS: [&str; 3] = ["longitude", "lon", "lng"];

/// Where to find an item's (lon, lat) position
pub enum Accessor<T> {
    /// Dotted path (`"location"`, `"geo.position"`) to either an object with
    /// `latitude`/`longitude` (or `lat`/`lng`/`lon`) members or a `[lon, lat]`
    /// array. Array items are read through their first entry.
    FieldPath(String),
    /// Function returning the coordinate, or `None` when the item has none
    Function(Arc<AccessorFn<T>>),
}

impl<T> Accessor<T> {
    pub fn field_path(path: impl Into<String>) -> Self {
        Self::FieldPath(path.into())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&T) -> Option<Coord<f64>> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }
}

impl<T: Serialize + 'static> Accessor<T> {
    /// Validate the accessor and turn it into a single extraction closure
    pub fn resolve(&self) -> Result<ResolvedAccessor<T>> {
        match self {
            Accessor::FieldPath(path) => {
                let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
                if segments.iter().any(|segment| segment.is_empty()) {
                    return Err(ClusterError::Configuration(format!(
                        "invalid accessor field path {:?}",
                        path
                    )));
                }
                let path = path.clone();
                Ok(ResolvedAccessor(Arc::new(move |item: &T| {
                    let value = serde_json::to_value(item).map_err(|e| {
                        ClusterError::Configuration(format!("item is not serializable: {}", e))
                    })?;
                    let root = group_head(&value, &segments[0]).ok_or_else(|| {
                        ClusterError::Configuration("item is an empty array".to_string())
                    })?;
                    let target = segments
                        .iter()
                        .try_fold(root, |value, segment| lookup(value, segment))
                        .ok_or_else(|| {
                            ClusterError::Configuration(format!("missing field {:?}", path))
                        })?;
                    coordinate_from_value(target).ok_or_else(|| {
                        ClusterError::Configuration(format!(
                            "field {:?} does not hold a numeric coordinate",
                            path
                        ))
                    })
                })))
            }
            Accessor::Function(f) => {
                let f = Arc::clone(f);
                Ok(ResolvedAccessor(Arc::new(move |item: &T| {
                    f(item)
                        .filter(|coord| coord.x.is_finite() && coord.y.is_finite())
                        .ok_or_else(|| {
                            ClusterError::Configuration(
                                "accessor returned no finite coordinate".to_string(),
                            )
                        })
                })))
            }
        }
    }
}

impl<T> Default for Accessor<T> {
    fn default() -> Self {
        Self::FieldPath("location".to_string())
    }
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        match self {
            Self::FieldPath(path) => Self::FieldPath(path.clone()),
            Self::Function(f) => Self::Function(Arc::clone(f)),
        }
    }
}

/// Function accessors compare by identity
impl<T> PartialEq for Accessor<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::FieldPath(a), Self::FieldPath(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldPath(path) => f.debug_tuple("FieldPath").field(path).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Validated coordinate extraction closure
pub struct ResolvedAccessor<T>(Arc<ResolvedFn<T>>);

impl<T> ResolvedAccessor<T> {
    #[inline]
    pub fn coordinate(&self, item: &T) -> Result<Coord<f64>> {
        (self.0)(item)
    }
}

impl<T> Clone for ResolvedAccessor<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for ResolvedAccessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResolvedAccessor(..)")
    }
}

/// Value a field path starts from
///
/// An array item groups several entries at the same position and is located
/// through its first entry, unless the path itself starts with an index.
fn group_head<'a>(value: &'a Value, first_segment: &str) -> Option<&'a Value> {
    match value {
        Value::Array(items) if first_segment.parse::<usize>().is_err() => items.first(),
        _ => Some(value),
    }
}

fn lookup<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn coordinate_from_value(value: &Value) -> Option<Coord<f64>> {
    let (lon, lat) = match value {
        Value::Object(map) => {
            let lat = LATITUDE_KEYS.iter().find_map(|key| map.get(*key))?;
            let lon = LONGITUDE_KEYS.iter().find_map(|key| map.get(*key))?;
            (lon.as_f64()?, lat.as_f64()?)
        }
        Value::Array(items) if items.len() >= 2 => (items[0].as_f64()?, items[1].as_f64()?),
        _ => return None,
    };

    (lon.is_finite() && lat.is_finite()).then_some(Coord { x: lon, y: lat })
}
