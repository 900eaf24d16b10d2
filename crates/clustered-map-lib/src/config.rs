//! Configuration for the index and the controller

use crate::expansion::{EdgePadding, ExpansionStrategy};
use crate::stabilizer::MatchPolicy;
use crate::{Accessor, ClusterError, Result};
use std::fmt;

/// Highest zoom level an index may be built for
pub const MAX_SUPPORTED_ZOOM: u8 = 24;

/// Parameters that determine the index's bucketing
///
/// Changing any field requires a full index rebuild.
pub struct IndexConfig<T> {
    /// Tile extent the radius is expressed in (default 512)
    pub extent: u32,
    /// Cluster radius in tile-extent units (default 40)
    pub radius: f64,
    /// Lowest zoom level clusters are generated for (default 0)
    pub min_zoom: u8,
    /// Highest zoom level clusters are generated for; above it every point
    /// is shown as a leaf (default 20)
    pub max_zoom: u8,
    /// Coordinate extraction for dataset items
    pub accessor: Accessor<T>,
}

impl<T> Default for IndexConfig<T> {
    fn default() -> Self {
        Self {
            extent: 512,
            radius: 40.0,
            min_zoom: 0,
            max_zoom: 20,
            accessor: Accessor::default(),
        }
    }
}

impl<T> IndexConfig<T> {
    /// Derive the cluster radius from the map width, one cluster per 22px
    /// column
    pub fn with_screen_width(mut self, width: f64) -> Self {
        self.radius = (width / 22.0).floor();
        self
    }

    pub fn with_accessor(mut self, accessor: Accessor<T>) -> Self {
        self.accessor = accessor;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_zoom > self.max_zoom {
            return Err(ClusterError::Configuration(format!(
                "min_zoom {} is greater than max_zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.max_zoom > MAX_SUPPORTED_ZOOM {
            return Err(ClusterError::Configuration(format!(
                "max_zoom {} exceeds the supported maximum {}",
                self.max_zoom, MAX_SUPPORTED_ZOOM
            )));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(ClusterError::Configuration(format!(
                "radius must be positive, got {}",
                self.radius
            )));
        }
        if self.extent == 0 {
            return Err(ClusterError::Configuration(
                "extent must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl<T> Clone for IndexConfig<T> {
    fn clone(&self) -> Self {
        Self {
            extent: self.extent,
            radius: self.radius,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            accessor: self.accessor.clone(),
        }
    }
}

impl<T> PartialEq for IndexConfig<T> {
    fn eq(&self, other: &Self) -> bool {
        self.extent == other.extent
            && self.radius == other.radius
            && self.min_zoom == other.min_zoom
            && self.max_zoom == other.max_zoom
            && self.accessor == other.accessor
    }
}

impl<T> fmt::Debug for IndexConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexConfig")
            .field("extent", &self.extent)
            .field("radius", &self.radius)
            .field("min_zoom", &self.min_zoom)
            .field("max_zoom", &self.max_zoom)
            .field("accessor", &self.accessor)
            .finish()
    }
}

/// Everything the controller consumes
pub struct ControllerConfig<T> {
    pub index: IndexConfig<T>,
    /// Maximum number of members fetched when a cluster is pressed
    /// (default 100)
    pub cluster_press_max_children: usize,
    /// Margin kept around pressed-cluster members when framing them
    pub edge_padding: EdgePadding,
    /// Compute a target region on press; when false the press is only
    /// surfaced to the press handler (default true)
    pub preserve_cluster_press_behavior: bool,
    pub expansion_strategy: ExpansionStrategy,
    pub match_policy: MatchPolicy,
}

impl<T> Default for ControllerConfig<T> {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            cluster_press_max_children: 100,
            edge_padding: EdgePadding::default(),
            preserve_cluster_press_behavior: true,
            expansion_strategy: ExpansionStrategy::default(),
            match_policy: MatchPolicy::default(),
        }
    }
}

impl<T> ControllerConfig<T> {
    pub fn validate(&self) -> Result<()> {
        self.index.validate()?;
        if self.cluster_press_max_children == 0 {
            return Err(ClusterError::Configuration(
                "cluster_press_max_children must be at least 1".to_string(),
            ));
        }
        if !self.edge_padding.is_valid() {
            return Err(ClusterError::Configuration(format!(
                "edge padding must be finite and non-negative, got {:?}",
                self.edge_padding
            )));
        }
        Ok(())
    }
}

impl<T> Clone for ControllerConfig<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index.clone(),
            cluster_press_max_children: self.cluster_press_max_children,
            edge_padding: self.edge_padding,
            preserve_cluster_press_behavior: self.preserve_cluster_press_behavior,
            expansion_strategy: self.expansion_strategy,
            match_policy: self.match_policy,
        }
    }
}

impl<T> fmt::Debug for ControllerConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("index", &self.index)
            .field("cluster_press_max_children", &self.cluster_press_max_children)
            .field("edge_padding", &self.edge_padding)
            .field(
                "preserve_cluster_press_behavior",
                &self.preserve_cluster_press_behavior,
            )
            .field("expansion_strategy", &self.expansion_strategy)
            .field("match_policy", &self.match_policy)
            .finish()
    }
}
