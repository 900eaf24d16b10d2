//! Spatial clustering index contract
//!
//! The controller drives any hierarchical point clusterer through the
//! [`ClusterIndex`] trait and only ever sees [`Feature`]s. The crate ships one
//! implementation, [`crate::GridClusterIndex`].

use crate::geo_math::BoundingBox;
use crate::{IndexConfig, Result};
use geo::Coord;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque cluster identifier assigned by an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ClusterId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster-{}", self.0)
    }
}

/// A point or cluster as returned by an index
///
/// `point_count == 0` marks a leaf carrying its source `item`; any other count
/// marks a cluster carrying a `cluster_id`.
#[derive(Debug)]
pub struct Feature<T> {
    /// Position as (lon, lat)
    pub coordinate: Coord<f64>,
    pub point_count: usize,
    pub item: Option<Arc<T>>,
    pub cluster_id: Option<ClusterId>,
}

impl<T> Feature<T> {
    pub fn leaf(coordinate: Coord<f64>, item: Arc<T>) -> Self {
        Self {
            coordinate,
            point_count: 0,
            item: Some(item),
            cluster_id: None,
        }
    }

    pub fn cluster(coordinate: Coord<f64>, point_count: usize, cluster_id: ClusterId) -> Self {
        Self {
            coordinate,
            point_count,
            item: None,
            cluster_id: Some(cluster_id),
        }
    }

    #[inline]
    pub fn is_cluster(&self) -> bool {
        self.point_count > 0
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.point_count == 0
    }
}

impl<T> Clone for Feature<T> {
    fn clone(&self) -> Self {
        Self {
            coordinate: self.coordinate,
            point_count: self.point_count,
            item: self.item.clone(),
            cluster_id: self.cluster_id,
        }
    }
}

/// Hierarchical point clusterer driven by the controller
///
/// Implementations are immutable once loaded; the lifecycle manager replaces
/// the whole index instead of mutating it.
pub trait ClusterIndex<T>: Send + Sync + Sized {
    /// Bulk-load leaf features into a fresh index
    fn load(config: &IndexConfig<T>, features: Vec<Feature<T>>) -> Result<Self>;

    /// Clusters and leaves intersecting `bbox` at `zoom`
    fn query(&self, bbox: &BoundingBox, zoom: u8) -> Result<Vec<Feature<T>>>;

    /// Up to `limit` leaves under a cluster, in index order
    fn leaves(&self, cluster_id: ClusterId, limit: usize) -> Result<Vec<Feature<T>>>;

    /// Zoom level at which a cluster first splits into its children
    fn expansion_zoom(&self, cluster_id: ClusterId) -> Result<u8>;
}

/// Result of one (bbox, zoom) query, after identity stabilization
#[derive(Debug)]
pub struct ClusterSnapshot<T> {
    pub bbox: Option<BoundingBox>,
    pub zoom: u8,
    /// Index generation the features were read from (0 before any dataset)
    pub generation: u64,
    pub features: Vec<Feature<T>>,
    /// Stabilized id -> id the current index knows the cluster by
    index_ids: HashMap<ClusterId, ClusterId>,
}

impl<T> ClusterSnapshot<T> {
    pub fn new(bbox: BoundingBox, zoom: u8, generation: u64, features: Vec<Feature<T>>) -> Self {
        Self {
            bbox: Some(bbox),
            zoom,
            generation,
            features,
            index_ids: HashMap::new(),
        }
    }

    /// Snapshot published before any dataset has been loaded
    pub fn empty() -> Self {
        Self {
            bbox: None,
            zoom: 0,
            generation: 0,
            features: Vec::new(),
            index_ids: HashMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Feature<T>> {
        self.features.iter().filter(|f| f.is_cluster())
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Feature<T>> {
        self.features.iter().filter(|f| f.is_leaf())
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters().count()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    /// Total number of source items represented by this snapshot
    pub fn point_count(&self) -> usize {
        self.features.iter().map(|f| f.point_count.max(1)).sum()
    }

    pub fn find_cluster(&self, cluster_id: ClusterId) -> Option<&Feature<T>> {
        self.clusters().find(|f| f.cluster_id == Some(cluster_id))
    }

    /// Translate a published cluster id into the id the index assigned
    pub fn index_id(&self, cluster_id: ClusterId) -> ClusterId {
        self.index_ids.get(&cluster_id).copied().unwrap_or(cluster_id)
    }

    pub(crate) fn set_index_ids(&mut self, index_ids: HashMap<ClusterId, ClusterId>) {
        self.index_ids = index_ids;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> ClusterSnapshot<&'static str> {
        ClusterSnapshot::new(
            BoundingBox::new(-1.0, -1.0, 1.0, 1.0),
            5,
            1,
            vec![
                Feature::leaf(Coord { x: 0.1, y: 0.1 }, Arc::new("cafe")),
                Feature::cluster(Coord { x: 0.5, y: 0.5 }, 4, ClusterId(7)),
                Feature::cluster(Coord { x: -0.5, y: 0.5 }, 2, ClusterId(9)),
            ],
        )
    }

    #[test]
    fn test_feature_kinds() {
        let leaf = Feature::leaf(Coord { x: 1.0, y: 2.0 }, Arc::new(42));
        assert!(leaf.is_leaf());
        assert!(!leaf.is_cluster());
        assert!(leaf.cluster_id.is_none());
        assert_eq!(leaf.item.as_deref(), Some(&42));

        let cluster: Feature<i32> = Feature::cluster(Coord { x: 1.0, y: 2.0 }, 3, ClusterId(1));
        assert!(cluster.is_cluster());
        assert!(cluster.item.is_none());
    }

    #[test]
    fn test_snapshot_counts() {
        let snapshot = sample_snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.cluster_count(), 2);
        assert_eq!(snapshot.leaf_count(), 1);
        assert_eq!(snapshot.point_count(), 7);
        assert!(snapshot.find_cluster(ClusterId(9)).is_some());
        assert!(snapshot.find_cluster(ClusterId(8)).is_none());
    }

    #[test]
    fn test_snapshot_index_ids() {
        let mut snapshot = sample_snapshot();
        assert_eq!(snapshot.index_id(ClusterId(7)), ClusterId(7));
        snapshot.set_index_ids(HashMap::from([(ClusterId(7), ClusterId(70))]));
        assert_eq!(snapshot.index_id(ClusterId(7)), ClusterId(70));
        assert_eq!(snapshot.index_id(ClusterId(9)), ClusterId(9));
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot: ClusterSnapshot<()> = ClusterSnapshot::empty();
        assert!(snapshot.is_empty());
        assert!(snapshot.bbox.is_none());
        assert_eq!(snapshot.generation, 0);
    }

    #[test]
    fn test_cluster_id_display() {
        assert_eq!(ClusterId(12).to_string(), "cluster-12");
    }
}
