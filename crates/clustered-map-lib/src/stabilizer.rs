//! Cluster identity stabilization
//!
//! An index hands out fresh cluster ids on every rebuild, so the same visual
//! cluster would otherwise be renumbered whenever the dataset is reloaded.
//! [`stabilize`] carries ids over from the previous result by matching
//! clusters on exact centroid and point count.

use crate::index::{ClusterId, Feature};
use geo::Coord;
use std::collections::{HashMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing centroids
pub const MATCH_EPSILON: f64 = f64::EPSILON;

/// How previous clusters may be claimed by new ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MatchPolicy {
    /// A previous cluster is consumed by its first match, so no id is handed
    /// out twice
    #[default]
    Exclusive,
    /// Every new cluster takes the first matching previous id, even if another
    /// cluster already took it
    FirstMatch,
}

/// Outcome of one stabilization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StabilizeReport {
    /// New clusters that inherited a previous id
    pub matched: usize,
    /// New clusters that kept the index's id
    pub unmatched: usize,
    /// Inherited id -> id the index assigned
    pub index_ids: HashMap<ClusterId, ClusterId>,
}

/// Overwrite the ids of clusters in `next` with the ids of geometrically
/// identical clusters in `previous`
///
/// Leaves are never touched. Under [`MatchPolicy::Exclusive`] an inherited id
/// that collides with an id some other new cluster kept from the index is
/// given back, so the published ids stay unique.
pub fn stabilize<T>(
    previous: &[Feature<T>],
    next: &mut [Feature<T>],
    policy: MatchPolicy,
) -> StabilizeReport {
    #[cfg(feature = "profiling")]
    profiling::scope!("stabilizer::stabilize");

    let previous_clusters: Vec<&Feature<T>> = previous
        .iter()
        .filter(|f| f.is_cluster() && f.cluster_id.is_some())
        .collect();

    let mut consumed = vec![false; previous_clusters.len()];
    // Position in `next` -> (raw id, inherited id)
    let mut inherited: Vec<(usize, ClusterId, ClusterId)> = Vec::new();

    for (position, cluster) in next.iter_mut().enumerate() {
        if !cluster.is_cluster() {
            continue;
        }
        let Some(raw_id) = cluster.cluster_id else {
            continue;
        };

        let (count, coordinate) = (cluster.point_count, cluster.coordinate);
        let found = previous_clusters
            .iter()
            .enumerate()
            .find(|(i, p)| {
                !(policy == MatchPolicy::Exclusive && consumed[*i])
                    && same_cluster(p, count, coordinate)
            })
            .map(|(i, p)| (i, p.cluster_id));

        if let Some((i, Some(previous_id))) = found {
            if policy == MatchPolicy::Exclusive {
                consumed[i] = true;
            }
            cluster.cluster_id = Some(previous_id);
            inherited.push((position, raw_id, previous_id));
        }
    }

    if policy == MatchPolicy::Exclusive {
        revert_collisions(next, &mut inherited);
    }

    let clusters = next.iter().filter(|f| f.is_cluster()).count();
    let report = StabilizeReport {
        matched: inherited.len(),
        unmatched: clusters - inherited.len(),
        index_ids: index_ids(next, &inherited),
    };

    tracing::trace!(
        "Stabilized {} clusters: {} matched, {} unmatched ({:?})",
        clusters,
        report.matched,
        report.unmatched,
        policy
    );

    report
}

/// Give back inherited ids that equal an id kept by an unmatched cluster,
/// until no two clusters share an id
fn revert_collisions<T>(next: &mut [Feature<T>], inherited: &mut Vec<(usize, ClusterId, ClusterId)>) {
    loop {
        let inherited_positions: HashSet<usize> = inherited.iter().map(|(p, _, _)| *p).collect();
        let kept: HashSet<ClusterId> = next
            .iter()
            .enumerate()
            .filter(|(p, f)| f.is_cluster() && !inherited_positions.contains(p))
            .filter_map(|(_, f)| f.cluster_id)
            .collect();

        let before = inherited.len();
        inherited.retain(|&(position, raw_id, stable_id)| {
            if kept.contains(&stable_id) {
                next[position].cluster_id = Some(raw_id);
                false
            } else {
                true
            }
        });
        if inherited.len() == before {
            break;
        }
    }
}

/// Stable id -> raw id, taken from the first cluster carrying each stable id
///
/// Under [`MatchPolicy::FirstMatch`] several clusters may share an id; the
/// first one is the one a lookup by id finds, so its raw id is the one kept.
fn index_ids<T>(
    next: &[Feature<T>],
    inherited: &[(usize, ClusterId, ClusterId)],
) -> HashMap<ClusterId, ClusterId> {
    let raw_ids: HashMap<usize, ClusterId> =
        inherited.iter().map(|&(position, raw, _)| (position, raw)).collect();

    let mut index_ids = HashMap::new();
    for (position, feature) in next.iter().enumerate() {
        if !feature.is_cluster() {
            continue;
        }
        let Some(stable) = feature.cluster_id else {
            continue;
        };
        let raw = raw_ids.get(&position).copied().unwrap_or(stable);
        index_ids.entry(stable).or_insert(raw);
    }
    index_ids.retain(|stable, raw| stable != raw);
    index_ids
}

#[inline]
fn same_cluster<T>(previous: &Feature<T>, point_count: usize, coordinate: Coord<f64>) -> bool {
    previous.point_count == point_count
        && (previous.coordinate.x - coordinate.x).abs() < MATCH_EPSILON
        && (previous.coordinate.y - coordinate.y).abs() < MATCH_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cluster(x: f64, y: f64, count: usize, id: u64) -> Feature<()> {
        Feature::cluster(Coord { x, y }, count, ClusterId(id))
    }

    fn ids(features: &[Feature<()>]) -> Vec<Option<u64>> {
        features.iter().map(|f| f.cluster_id.map(|id| id.0)).collect()
    }

    #[test]
    fn test_matching_cluster_keeps_previous_id() {
        let previous = vec![cluster(1.0, 2.0, 3, 10)];
        let mut next = vec![cluster(1.0, 2.0, 3, 99)];
        let report = stabilize(&previous, &mut next, MatchPolicy::Exclusive);

        assert_eq!(ids(&next), vec![Some(10)]);
        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched, 0);
        assert_eq!(report.index_ids.get(&ClusterId(10)), Some(&ClusterId(99)));
    }

    #[test]
    fn test_count_or_position_mismatch_keeps_new_id() {
        let previous = vec![cluster(1.0, 2.0, 3, 10)];
        let mut next = vec![cluster(1.0, 2.0, 4, 20), cluster(1.0 + 1e-9, 2.0, 3, 21)];
        let report = stabilize(&previous, &mut next, MatchPolicy::Exclusive);

        assert_eq!(ids(&next), vec![Some(20), Some(21)]);
        assert_eq!(report.matched, 0);
        assert_eq!(report.unmatched, 2);
        assert!(report.index_ids.is_empty());
    }

    #[test]
    fn test_leaves_are_untouched() {
        let previous = vec![cluster(1.0, 2.0, 3, 10)];
        let mut next = vec![Feature::leaf(Coord { x: 1.0, y: 2.0 }, Arc::new(()))];
        let report = stabilize(&previous, &mut next, MatchPolicy::Exclusive);
        assert_eq!(ids(&next), vec![None]);
        assert_eq!(report, StabilizeReport::default());
    }

    #[test]
    fn test_previous_leaves_are_not_candidates() {
        let previous = vec![Feature::leaf(Coord { x: 1.0, y: 2.0 }, Arc::new(()))];
        let mut next = vec![cluster(1.0, 2.0, 3, 42)];
        stabilize(&previous, &mut next, MatchPolicy::Exclusive);
        assert_eq!(ids(&next), vec![Some(42)]);
    }

    #[test]
    fn test_exclusive_never_assigns_twice() {
        let previous = vec![cluster(1.0, 2.0, 3, 10)];
        let mut next = vec![cluster(1.0, 2.0, 3, 20), cluster(1.0, 2.0, 3, 21)];
        let report = stabilize(&previous, &mut next, MatchPolicy::Exclusive);
        assert_eq!(ids(&next), vec![Some(10), Some(21)]);
        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched, 1);
    }

    #[test]
    fn test_first_match_may_assign_twice() {
        let previous = vec![cluster(1.0, 2.0, 3, 10)];
        let mut next = vec![cluster(1.0, 2.0, 3, 20), cluster(1.0, 2.0, 3, 21)];
        let report = stabilize(&previous, &mut next, MatchPolicy::FirstMatch);
        assert_eq!(ids(&next), vec![Some(10), Some(10)]);
        assert_eq!(report.matched, 2);
    }

    #[test]
    fn test_first_match_shared_id_maps_to_first_cluster() {
        let previous = vec![cluster(1.0, 2.0, 3, 10)];
        let mut next = vec![cluster(1.0, 2.0, 3, 20), cluster(1.0, 2.0, 3, 21)];
        let report = stabilize(&previous, &mut next, MatchPolicy::FirstMatch);
        assert_eq!(report.index_ids.len(), 1);
        assert_eq!(report.index_ids.get(&ClusterId(10)), Some(&ClusterId(20)));

        // An unmatched cluster already holding the id comes first: no translation
        let mut next = vec![cluster(5.0, 5.0, 3, 10), cluster(1.0, 2.0, 3, 21)];
        let report = stabilize(&previous, &mut next, MatchPolicy::FirstMatch);
        assert_eq!(ids(&next), vec![Some(10), Some(10)]);
        assert!(report.index_ids.is_empty());
    }

    #[test]
    fn test_first_match_wins() {
        let previous = vec![cluster(1.0, 2.0, 3, 10), cluster(1.0, 2.0, 3, 11)];
        let mut next = vec![cluster(1.0, 2.0, 3, 20)];
        stabilize(&previous, &mut next, MatchPolicy::FirstMatch);
        assert_eq!(ids(&next), vec![Some(10)]);
    }

    #[test]
    fn test_exclusive_reverts_collision_with_kept_id() {
        // The second cluster moved and keeps its raw id 7, which the first
        // cluster would otherwise inherit
        let previous = vec![cluster(1.0, 2.0, 3, 7)];
        let mut next = vec![cluster(1.0, 2.0, 3, 30), cluster(5.0, 5.0, 2, 7)];
        let report = stabilize(&previous, &mut next, MatchPolicy::Exclusive);
        assert_eq!(ids(&next), vec![Some(30), Some(7)]);
        assert_eq!(report.matched, 0);
        assert_eq!(report.unmatched, 2);
    }

    #[test]
    fn test_exclusive_ids_are_unique() {
        let previous = vec![
            cluster(0.0, 0.0, 2, 1),
            cluster(1.0, 1.0, 2, 2),
            cluster(2.0, 2.0, 2, 3),
        ];
        let mut next = vec![
            cluster(0.0, 0.0, 2, 2),
            cluster(1.0, 1.0, 2, 3),
            cluster(9.0, 9.0, 2, 1),
            cluster(2.0, 2.0, 2, 4),
        ];
        stabilize(&previous, &mut next, MatchPolicy::Exclusive);

        let assigned: Vec<u64> = ids(&next).into_iter().flatten().collect();
        let unique: HashSet<u64> = assigned.iter().copied().collect();
        assert_eq!(unique.len(), assigned.len());
    }
}
