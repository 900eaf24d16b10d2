//! Greedy radius clustering over a per-zoom hierarchy
//!
//! Points are projected into Web Mercator unit space and clustered bottom-up:
//! the deepest level holds one node per leaf, and each coarser level is built
//! by merging every node of the level below with its still-unvisited
//! neighbours inside the zoom's cluster radius. Neighbour lookup uses a hash
//! grid whose cell size equals the radius, so each merge only scans 9 cells.
//!
//! Cluster ids come from a process-wide counter and are never reused, even
//! across rebuilds of the same dataset.

use crate::geo_math::BoundingBox;
use crate::index::{ClusterId, ClusterIndex, Feature};
use crate::utils::{MAX_LATITUDE, lat_to_unit_y, lon_to_unit_x, project_unit, unproject_unit};
use crate::{ClusterError, IndexConfig, Result};
use geo::Coord;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CLUSTER_ID: AtomicU64 = AtomicU64::new(1);

fn next_cluster_id() -> ClusterId {
    ClusterId(NEXT_CLUSTER_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeKind {
    /// Index into the leaf tables
    Leaf(usize),
    Cluster(ClusterId),
}

/// A point or cluster at one zoom level, positioned in unit space
#[derive(Debug, Clone, Copy)]
struct Node {
    x: f64,
    y: f64,
    /// Number of source points represented (1 for a leaf)
    count: usize,
    kind: NodeKind,
}

/// All nodes visible at one zoom level
#[derive(Debug, Default)]
struct Level {
    nodes: Vec<Node>,
    /// Node indices ordered by x, for range scans
    by_x: Vec<usize>,
}

impl Level {
    fn new(nodes: Vec<Node>) -> Self {
        let mut by_x: Vec<usize> = (0..nodes.len()).collect();
        by_x.sort_by(|&a, &b| nodes[a].x.total_cmp(&nodes[b].x));
        Self { nodes, by_x }
    }

    /// Indices of nodes inside the unit-space rectangle, in node order
    fn range(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64, out: &mut Vec<usize>) {
        let start = self.by_x.partition_point(|&i| self.nodes[i].x < min_x);
        for &i in &self.by_x[start..] {
            let node = &self.nodes[i];
            if node.x > max_x {
                break;
            }
            if node.y >= min_y && node.y <= max_y {
                out.push(i);
            }
        }
    }
}

/// Where a cluster was formed and what it was formed from
#[derive(Debug, Clone)]
struct ClusterEntry {
    /// Zoom level at which the cluster first appears
    zoom: u8,
    /// Indices into the nodes of the level at `zoom + 1`
    children: Vec<usize>,
}

/// Default [`ClusterIndex`] implementation
pub struct GridClusterIndex<T> {
    min_zoom: u8,
    max_zoom: u8,
    /// One level per zoom from `min_zoom` to `max_zoom + 1`; the last one holds
    /// the unclustered leaves
    levels: Vec<Level>,
    clusters: HashMap<ClusterId, ClusterEntry>,
    items: Vec<Arc<T>>,
    /// Source coordinates of the leaves, returned untouched by queries
    coordinates: Vec<Coord<f64>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T> GridClusterIndex<T> {
    /// Number of leaves loaded
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of distinct clusters across every zoom level
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    fn level(&self, zoom: u8) -> &Level {
        let zoom = zoom.clamp(self.min_zoom, self.max_zoom + 1);
        &self.levels[(zoom - self.min_zoom) as usize]
    }

    fn to_feature(&self, node: &Node) -> Feature<T> {
        match node.kind {
            NodeKind::Leaf(i) => Feature::leaf(self.coordinates[i], Arc::clone(&self.items[i])),
            NodeKind::Cluster(id) => Feature::cluster(
                unproject_unit(Coord {
                    x: node.x,
                    y: node.y,
                }),
                node.count,
                id,
            ),
        }
    }

    fn query_unit(
        &self,
        level: &Level,
        west: f64,
        south: f64,
        east: f64,
        north: f64,
        out: &mut Vec<usize>,
    ) {
        level.range(
            lon_to_unit_x(west),
            lat_to_unit_y(north),
            lon_to_unit_x(east),
            lat_to_unit_y(south),
            out,
        );
    }
}

/// Merge one level into the next coarser one
///
/// `radius` is in unit space. Returns the coarser nodes and the entries of the
/// clusters created on the way.
fn cluster_level(
    nodes: &[Node],
    radius: f64,
    zoom: u8,
) -> (Vec<Node>, Vec<(ClusterId, ClusterEntry)>) {
    let cell = |x: f64, y: f64| ((x / radius).floor() as i64, (y / radius).floor() as i64);

    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        grid.entry(cell(node.x, node.y)).or_default().push(i);
    }

    let radius_sq = radius * radius;
    let mut visited = vec![false; nodes.len()];
    let mut merged = Vec::with_capacity(nodes.len());
    let mut entries = Vec::new();
    let mut neighbours = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        neighbours.clear();
        let (cx, cy) = cell(node.x, node.y);
        for gx in cx - 1..=cx + 1 {
            for gy in cy - 1..=cy + 1 {
                let Some(candidates) = grid.get(&(gx, gy)) else {
                    continue;
                };
                for &j in candidates {
                    if visited[j] {
                        continue;
                    }
                    let dx = nodes[j].x - node.x;
                    let dy = nodes[j].y - node.y;
                    if dx * dx + dy * dy <= radius_sq {
                        neighbours.push(j);
                    }
                }
            }
        }

        if neighbours.is_empty() {
            merged.push(*node);
            continue;
        }

        // Grid cells are visited out of node order; keep children sorted so
        // leaf retrieval is deterministic
        neighbours.sort_unstable();

        let mut count = node.count;
        let mut wx = node.x * node.count as f64;
        let mut wy = node.y * node.count as f64;
        let mut children = Vec::with_capacity(neighbours.len() + 1);
        children.push(i);
        for &j in &neighbours {
            visited[j] = true;
            let other = &nodes[j];
            count += other.count;
            wx += other.x * other.count as f64;
            wy += other.y * other.count as f64;
            children.push(j);
        }

        let id = next_cluster_id();
        merged.push(Node {
            x: wx / count as f64,
            y: wy / count as f64,
            count,
            kind: NodeKind::Cluster(id),
        });
        entries.push((id, ClusterEntry { zoom, children }));
    }

    (merged, entries)
}

/// Wrap a longitude into `[-180, 180)`
fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

impl<T: Send + Sync> ClusterIndex<T> for GridClusterIndex<T> {
    fn load(config: &IndexConfig<T>, features: Vec<Feature<T>>) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("grid_index::load");

        config.validate()?;

        let mut items = Vec::with_capacity(features.len());
        let mut coordinates = Vec::with_capacity(features.len());
        for (i, feature) in features.into_iter().enumerate() {
            let item = feature.item.ok_or_else(|| {
                ClusterError::Configuration(format!("feature {} is not a leaf", i))
            })?;
            let coordinate = feature.coordinate;
            if !(coordinate.x.is_finite() && coordinate.y.is_finite()) {
                return Err(ClusterError::Configuration(format!(
                    "feature {} has a non-finite coordinate",
                    i
                )));
            }
            items.push(item);
            coordinates.push(coordinate);
        }

        let leaves: Vec<Node> = coordinates
            .par_iter()
            .enumerate()
            .map(|(i, &coordinate)| {
                let unit = project_unit(coordinate);
                Node {
                    x: unit.x,
                    y: unit.y,
                    count: 1,
                    kind: NodeKind::Leaf(i),
                }
            })
            .collect();

        let extent = config.extent as f64;
        let mut levels = vec![Level::new(leaves)];
        let mut clusters = HashMap::new();
        for zoom in (config.min_zoom..=config.max_zoom).rev() {
            let radius = config.radius / (extent * (zoom as f64).exp2());
            let finer = levels.last().map(|level| level.nodes.as_slice()).unwrap_or_default();
            let (nodes, entries) = cluster_level(finer, radius, zoom);
            clusters.extend(entries);
            levels.push(Level::new(nodes));
        }
        levels.reverse();

        tracing::debug!(
            "Built cluster index with {} leaves and {} clusters over zooms {}..={}",
            items.len(),
            clusters.len(),
            config.min_zoom,
            config.max_zoom
        );

        Ok(Self {
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom,
            levels,
            clusters,
            items,
            coordinates,
        })
    }

    fn query(&self, bbox: &BoundingBox, zoom: u8) -> Result<Vec<Feature<T>>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("grid_index::query");

        if ![bbox.west, bbox.south, bbox.east, bbox.north]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(ClusterError::IndexQuery(format!(
                "non-finite bounding box {:?}",
                bbox
            )));
        }

        let level = self.level(zoom);
        let south = bbox.south.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let north = bbox.north.clamp(-MAX_LATITUDE, MAX_LATITUDE);

        let mut hits = Vec::new();
        if bbox.east - bbox.west >= 360.0 {
            self.query_unit(level, -180.0, south, 180.0, north, &mut hits);
        } else {
            let west = wrap_longitude(bbox.west);
            let east = if bbox.east == 180.0 {
                180.0
            } else {
                wrap_longitude(bbox.east)
            };
            if west > east {
                self.query_unit(level, west, south, 180.0, north, &mut hits);
                self.query_unit(level, -180.0, south, east, north, &mut hits);
            } else {
                self.query_unit(level, west, south, east, north, &mut hits);
            }
        }
        hits.sort_unstable();
        hits.dedup();

        Ok(hits
            .into_iter()
            .map(|i| self.to_feature(&level.nodes[i]))
            .collect())
    }

    fn leaves(&self, cluster_id: ClusterId, limit: usize) -> Result<Vec<Feature<T>>> {
        let entry = self
            .clusters
            .get(&cluster_id)
            .ok_or(ClusterError::UnknownCluster(cluster_id))?;

        let mut result = Vec::new();
        // Depth-first, children in node order
        let mut stack: Vec<(u8, usize)> = entry
            .children
            .iter()
            .rev()
            .map(|&child| (entry.zoom + 1, child))
            .collect();
        while let Some((zoom, index)) = stack.pop() {
            if result.len() >= limit {
                break;
            }
            let node = &self.level(zoom).nodes[index];
            match node.kind {
                NodeKind::Leaf(_) => result.push(self.to_feature(node)),
                NodeKind::Cluster(id) => {
                    let child = self
                        .clusters
                        .get(&id)
                        .ok_or(ClusterError::UnknownCluster(id))?;
                    stack.extend(child.children.iter().rev().map(|&c| (child.zoom + 1, c)));
                }
            }
        }

        Ok(result)
    }

    fn expansion_zoom(&self, cluster_id: ClusterId) -> Result<u8> {
        self.clusters
            .get(&cluster_id)
            .map(|entry| entry.zoom + 1)
            .ok_or(ClusterError::UnknownCluster(cluster_id))
    }
}
