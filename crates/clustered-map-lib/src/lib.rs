//! Clustered Map Library - Viewport-Driven Point Clustering
//!
//! This library groups large point datasets into clusters that follow the map
//! viewport, so a map never has to draw more than a screen's worth of markers.
//! It turns map regions into (bounding box, zoom) queries, keeps cluster ids
//! stable across re-clustering passes and works out where to move the map when
//! a cluster is pressed.
//!
//! # Architecture
//!
//! - **[`ClusterController`]**: Orchestrates dataset, region and press events
//! - **[`IndexManager`]**: Builds and atomically publishes index generations
//! - **[`ClusterIndex`]**: Contract for hierarchical point clusterers, with
//!   [`GridClusterIndex`] as the default implementation
//! - **[`stabilize`]**: Carries cluster ids over between results
//! - **[`geo_math`]** and **[`zoom`]**: Region, bounding box and zoom math
//!
//! # Performance Characteristics
//!
//! - **Build Time**: O(N) per zoom level with a hash grid, coordinate
//!   extraction parallelized
//! - **Query Time**: O(log N + K) where K = features in the viewport
//! - **Stabilization**: O(P×C) where P, C = previous and current clusters

mod accessor;
mod config;
mod controller;
mod expansion;
pub mod geo_math;
mod grid_index;
mod index;
mod lifecycle;
mod stabilizer;
pub mod utils;
pub mod zoom;

// Public API exports
pub use accessor::{Accessor, ResolvedAccessor};
pub use config::{ControllerConfig, IndexConfig, MAX_SUPPORTED_ZOOM};
pub use controller::{ClusterController, LayoutChange, MAX_CLUSTERING_LONGITUDE_DELTA, PressHandler};
pub use expansion::{
    EdgePadding, ExpansionOptions, ExpansionStrategy, PressOutcome, fit_region,
    on_cluster_selected,
};
pub use geo_math::{BoundingBox, Region};
pub use grid_index::GridClusterIndex;
pub use index::{ClusterId, ClusterIndex, ClusterSnapshot, Feature};
pub use lifecycle::{Dataset, IndexGeneration, IndexManager, IndexReader, PendingRebuild};
pub use stabilizer::{MatchPolicy, StabilizeReport, stabilize};

/// Error types for the clustering pipeline
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Empty input")]
    EmptyInput,

    #[error("Unknown cluster: {0}")]
    UnknownCluster(ClusterId),

    #[error("No index has been built yet")]
    NoIndex,

    #[error("Index query failed: {0}")]
    IndexQuery(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
