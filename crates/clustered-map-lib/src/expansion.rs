//! Cluster press handling
//!
//! Pressing a cluster fetches (a bounded number of) its members and works out
//! the region the map should move to next.

use crate::geo_math::{BoundingBox, Region};
use crate::index::{ClusterId, ClusterIndex, Feature};
use crate::lifecycle::IndexGeneration;
use crate::utils::{lat_to_unit_y, lon_to_unit_x, unit_x_to_lon, unit_y_to_lat, world_size_pixels};
use crate::zoom::{bounds_at_zoom, fit_zoom};
use crate::{ClusterError, ControllerConfig, Result};
use geo::Coord;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default margin kept on each side of the framed members, in pixels
pub const DEFAULT_EDGE_PADDING: f64 = 50.0;

/// Pixel margins kept around framed members
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EdgePadding {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl EdgePadding {
    pub fn uniform(padding: f64) -> Self {
        Self {
            top: padding,
            right: padding,
            bottom: padding,
            left: padding,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.top, self.right, self.bottom, self.left]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

impl Default for EdgePadding {
    fn default() -> Self {
        Self::uniform(DEFAULT_EDGE_PADDING)
    }
}

/// How the target region of a pressed cluster is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ExpansionStrategy {
    /// Frame the fetched members plus edge padding
    #[default]
    FitToChildren,
    /// Center on the cluster at the index's expansion zoom
    ZoomToRegion,
}

/// Press parameters taken from the controller's state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpansionOptions {
    pub max_children: usize,
    pub edge_padding: EdgePadding,
    pub preserve_cluster_press_behavior: bool,
    pub strategy: ExpansionStrategy,
    pub screen_size: (f64, f64),
    /// Framing never zooms in past this level
    pub max_zoom: u8,
}

impl ExpansionOptions {
    pub fn from_config<T>(config: &ControllerConfig<T>, screen_size: (f64, f64)) -> Self {
        Self {
            max_children: config.cluster_press_max_children,
            edge_padding: config.edge_padding,
            preserve_cluster_press_behavior: config.preserve_cluster_press_behavior,
            strategy: config.expansion_strategy,
            screen_size,
            max_zoom: config.index.max_zoom,
        }
    }
}

/// What happened when a cluster was pressed
#[derive(Debug)]
pub enum PressOutcome<T> {
    /// The map should move to `target_region` to show `members`
    Framed {
        cluster_id: ClusterId,
        target_region: Region,
        members: Vec<Arc<T>>,
    },
    /// Framing is disabled; the press is left to the press handler
    Delegated { cluster_id: ClusterId },
}

impl<T> PressOutcome<T> {
    pub fn cluster_id(&self) -> ClusterId {
        match self {
            Self::Framed { cluster_id, .. } | Self::Delegated { cluster_id } => *cluster_id,
        }
    }

    pub fn target_region(&self) -> Option<&Region> {
        match self {
            Self::Framed { target_region, .. } => Some(target_region),
            Self::Delegated { .. } => None,
        }
    }

    pub fn members(&self) -> Option<&[Arc<T>]> {
        match self {
            Self::Framed { members, .. } => Some(members),
            Self::Delegated { .. } => None,
        }
    }
}

/// Resolve a press on `cluster`
///
/// `index_id` is the id the generation's index knows the cluster by, which may
/// differ from the published (stabilized) id carried by `cluster`.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn on_cluster_selected<T, I>(
    generation: &IndexGeneration<T, I>,
    cluster: &Feature<T>,
    index_id: ClusterId,
    options: &ExpansionOptions,
) -> Result<PressOutcome<T>>
where
    I: ClusterIndex<T>,
{
    let cluster_id = cluster.cluster_id.unwrap_or(index_id);
    let index = &generation.index;

    if !options.preserve_cluster_press_behavior {
        // Still reject ids the index does not know
        index.expansion_zoom(index_id)?;
        return Ok(PressOutcome::Delegated { cluster_id });
    }

    let members: Vec<Arc<T>> = index
        .leaves(index_id, options.max_children)?
        .into_iter()
        .filter_map(|leaf| leaf.item)
        .collect();

    let target_region = match options.strategy {
        ExpansionStrategy::FitToChildren => {
            let mut coordinates = members
                .iter()
                .map(|member| generation.accessor.coordinate(member))
                .collect::<Result<Vec<_>>>()?;
            if coordinates.is_empty() {
                coordinates.push(cluster.coordinate);
            }
            fit_region(
                &coordinates,
                options.edge_padding,
                options.screen_size,
                options.max_zoom,
            )?
        }
        ExpansionStrategy::ZoomToRegion => {
            let mut zoom = index.expansion_zoom(index_id)?;
            if zoom == 1 {
                zoom += 1;
            }
            let bounds = bounds_at_zoom(cluster.coordinate, zoom as f64, options.screen_size);
            Region::new(
                cluster.coordinate.y,
                cluster.coordinate.x,
                bounds.height() / 4.0,
                bounds.width() / 4.0,
            )
        }
    };

    tracing::debug!(
        "Pressed {} with {} members, framing {:?}",
        cluster_id,
        members.len(),
        target_region
    );

    Ok(PressOutcome::Framed {
        cluster_id,
        target_region,
        members,
    })
}

/// Smallest region showing every point with `padding` pixels to spare in a
/// viewport of `screen_size`, zoomed in no further than `max_zoom`
pub fn fit_region(
    points: &[Coord<f64>],
    padding: EdgePadding,
    screen_size: (f64, f64),
    max_zoom: u8,
) -> Result<Region> {
    let bbox = BoundingBox::from_points(points).ok_or(ClusterError::EmptyInput)?;

    let (width, height) = screen_size;
    let inner = (
        (width - padding.left - padding.right).max(1.0),
        (height - padding.top - padding.bottom).max(1.0),
    );
    let zoom = fit_zoom(&bbox, inner);
    let zoom = if zoom.is_finite() {
        zoom.min(max_zoom as f64)
    } else {
        max_zoom as f64
    };

    let world = world_size_pixels(zoom);
    let west = unit_x_to_lon((lon_to_unit_x(bbox.west) * world - padding.left) / world);
    let east = unit_x_to_lon((lon_to_unit_x(bbox.east) * world + padding.right) / world);
    let north = unit_y_to_lat((lat_to_unit_y(bbox.north) * world - padding.top) / world);
    let south = unit_y_to_lat((lat_to_unit_y(bbox.south) * world + padding.bottom) / world);

    Ok(Region::new(
        (north + south) / 2.0,
        (west + east) / 2.0,
        (north - south) / 2.0,
        (east - west) / 2.0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_padding() {
        assert_eq!(EdgePadding::default(), EdgePadding::uniform(50.0));
        assert!(EdgePadding::default().is_valid());
        assert!(!EdgePadding::uniform(f64::INFINITY).is_valid());
        assert!(
            !EdgePadding {
                left: -2.0,
                ..Default::default()
            }
            .is_valid()
        );
    }

    #[test]
    fn test_fit_region_contains_points_with_margin() {
        let points = [Coord { x: 2.30, y: 48.84 }, Coord { x: 2.38, y: 48.88 }];
        let region = fit_region(&points, EdgePadding::default(), (1080.0, 1920.0), 20).unwrap();
        let bbox = region.to_bounding_box();

        for point in &points {
            assert!(bbox.contains(*point));
        }
        assert!(bbox.west < 2.30 && bbox.east > 2.38);
        assert!(bbox.south < 48.84 && bbox.north > 48.88);
    }

    #[test]
    fn test_fit_region_without_padding_is_tight() {
        let points = [Coord { x: 10.0, y: 0.0 }, Coord { x: 12.0, y: 0.5 }];
        let region = fit_region(&points, EdgePadding::uniform(0.0), (800.0, 800.0), 20).unwrap();
        assert!((region.longitude - 11.0).abs() < 1e-9);
        assert!((region.longitude_delta - 1.0).abs() < 1e-9);
        assert!((region.latitude_delta - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_fit_region_single_point_caps_zoom() {
        let point = Coord { x: 2.35, y: 48.85 };
        let region = fit_region(&[point], EdgePadding::default(), (1000.0, 1000.0), 16).unwrap();
        assert!(region.to_bounding_box().contains(point));
        assert!(region.longitude_delta > 0.0);
        assert!(region.latitude_delta > 0.0);

        // 50px at zoom 16 is roughly 0.00107 degrees of longitude
        let pixels_per_degree = world_size_pixels(16.0) / 360.0;
        assert!((region.longitude_delta * pixels_per_degree - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_fit_region_empty() {
        assert!(matches!(
            fit_region(&[], EdgePadding::default(), (100.0, 100.0), 20),
            Err(ClusterError::EmptyInput)
        ));
    }

    #[test]
    fn test_press_outcome_accessors() {
        let framed: PressOutcome<u8> = PressOutcome::Framed {
            cluster_id: ClusterId(3),
            target_region: Region::new(1.0, 2.0, 0.1, 0.1),
            members: vec![Arc::new(1), Arc::new(2)],
        };
        assert_eq!(framed.cluster_id(), ClusterId(3));
        assert_eq!(framed.members().map(<[_]>::len), Some(2));
        assert!(framed.target_region().is_some());

        let delegated: PressOutcome<u8> = PressOutcome::Delegated {
            cluster_id: ClusterId(4),
        };
        assert_eq!(delegated.cluster_id(), ClusterId(4));
        assert!(delegated.members().is_none());
        assert!(delegated.target_region().is_none());
    }
}
