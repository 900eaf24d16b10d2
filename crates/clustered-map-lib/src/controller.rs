//! Viewport-driven clustering controller
//!
//! [`ClusterController`] ties the pieces together: dataset changes rebuild the
//! index, region changes requery it, every result is stabilized against the
//! previous one and published as an immutable [`ClusterSnapshot`].

use crate::expansion::{ExpansionOptions, PressOutcome, on_cluster_selected};
use crate::geo_math::Region;
use crate::grid_index::GridClusterIndex;
use crate::index::{ClusterId, ClusterIndex, ClusterSnapshot};
use crate::lifecycle::{Dataset, IndexGeneration, IndexManager, IndexReader, PendingRebuild};
use crate::stabilizer::stabilize;
use crate::zoom::resolve_zoom;
use crate::{ClusterError, ControllerConfig, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Longitude half-span at or above which a region change keeps the current
/// clusters instead of requerying
pub const MAX_CLUSTERING_LONGITUDE_DELTA: f64 = 80.0;

/// Callback invoked on every cluster press, with the fetched members when the
/// press was framed
pub type PressHandler<T> = Box<dyn FnMut(ClusterId, Option<&[Arc<T>]>) + Send>;

/// Whether a published update changed how many markers are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutChange {
    Unchanged { count: usize },
    Changed { previous: usize, current: usize },
}

impl LayoutChange {
    pub fn between<T>(previous: &ClusterSnapshot<T>, current: &ClusterSnapshot<T>) -> Self {
        if previous.len() == current.len() {
            Self::Unchanged {
                count: current.len(),
            }
        } else {
            Self::Changed {
                previous: previous.len(),
                current: current.len(),
            }
        }
    }

    #[inline]
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingState {
    generation: u64,
    /// Latest region received while the rebuild was outstanding
    queued_region: Option<Region>,
}

pub struct ClusterController<T, I = GridClusterIndex<T>> {
    config: ControllerConfig<T>,
    screen_size: (f64, f64),
    region: Region,
    dataset: Option<Dataset<T>>,
    manager: IndexManager<T, I>,
    snapshot: Arc<ClusterSnapshot<T>>,
    pending: Option<PendingState>,
    press_handler: Option<PressHandler<T>>,
}

fn validate_screen_size(screen_size: (f64, f64)) -> Result<()> {
    let (width, height) = screen_size;
    if width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0 {
        Ok(())
    } else {
        Err(ClusterError::Configuration(format!(
            "screen size must be positive, got {}x{}",
            width, height
        )))
    }
}

impl<T, I> ClusterController<T, I> {
    pub fn snapshot(&self) -> Arc<ClusterSnapshot<T>> {
        Arc::clone(&self.snapshot)
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Zoom level of the published snapshot
    pub fn zoom(&self) -> u8 {
        self.snapshot.zoom
    }

    pub fn config(&self) -> &ControllerConfig<T> {
        &self.config
    }

    pub fn screen_size(&self) -> (f64, f64) {
        self.screen_size
    }

    pub fn dataset(&self) -> Option<&Dataset<T>> {
        self.dataset.as_ref()
    }

    pub fn reader(&self) -> IndexReader<T, I> {
        self.manager.reader()
    }

    /// Whether a two-phase rebuild is outstanding
    pub fn is_rebuilding(&self) -> bool {
        self.pending.is_some()
    }

    pub fn set_press_handler<F>(&mut self, handler: F)
    where
        F: FnMut(ClusterId, Option<&[Arc<T>]>) + Send + 'static,
    {
        self.press_handler = Some(Box::new(handler));
    }

    pub fn clear_press_handler(&mut self) {
        self.press_handler = None;
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T, I> ClusterController<T, I>
where
    T: Serialize + Send + Sync + 'static,
    I: ClusterIndex<T>,
{
    /// Controller without data; the first [`Self::set_dataset`] builds the index
    pub fn new(
        config: ControllerConfig<T>,
        initial_region: Region,
        screen_size: (f64, f64),
    ) -> Result<Self> {
        config.validate()?;
        validate_screen_size(screen_size)?;

        Ok(Self {
            config,
            screen_size,
            region: initial_region.normalized(),
            dataset: None,
            manager: IndexManager::new(),
            snapshot: Arc::new(ClusterSnapshot::empty()),
            pending: None,
            press_handler: None,
        })
    }

    /// Replace the dataset
    ///
    /// Rebuilds only when the dataset allocation differs from the indexed
    /// one, then requeries the current region.
    pub fn set_dataset(&mut self, dataset: Dataset<T>) -> Result<LayoutChange> {
        self.dataset = Some(dataset.clone());
        if self.manager.needs_rebuild(&dataset, &self.config.index) {
            self.rebuild_now(dataset)?;
        }
        self.refresh()
    }

    /// Replace the configuration, rebuilding when index parameters changed
    pub fn set_config(&mut self, config: ControllerConfig<T>) -> Result<LayoutChange> {
        config.validate()?;
        self.config = config;
        let Some(dataset) = self.dataset.clone() else {
            return Ok(self.unchanged());
        };
        if self.manager.needs_rebuild(&dataset, &self.config.index) {
            self.rebuild_now(dataset)?;
        }
        self.refresh()
    }

    pub fn set_screen_size(&mut self, screen_size: (f64, f64)) -> Result<LayoutChange> {
        validate_screen_size(screen_size)?;
        self.screen_size = screen_size;
        if self.pending.is_some() {
            return Ok(self.unchanged());
        }
        self.refresh()
    }

    /// Handle a viewport change reported by the map
    ///
    /// The region is normalized first. Regions too wide to cluster keep both
    /// the current snapshot and the current region. While a two-phase rebuild
    /// is outstanding the region is queued and replayed once it lands.
    pub fn on_region_change(&mut self, region: Region) -> Result<LayoutChange> {
        let region = region.normalized();

        if region.longitude_delta >= MAX_CLUSTERING_LONGITUDE_DELTA {
            tracing::debug!(
                "Longitude delta {} too wide to cluster, keeping current clusters",
                region.longitude_delta
            );
            return Ok(self.unchanged());
        }

        if let Some(pending) = self.pending.as_mut() {
            tracing::debug!(
                "Queuing region change until generation {} is installed",
                pending.generation
            );
            pending.queued_region = Some(region);
            return Ok(self.unchanged());
        }

        self.region = region;
        self.refresh()
    }

    /// Start a rebuild for `dataset` that the caller builds elsewhere
    ///
    /// Region changes are queued until [`Self::finish_rebuild`] receives the
    /// result. Starting another rebuild supersedes this one.
    pub fn begin_rebuild(&mut self, dataset: Dataset<T>) -> PendingRebuild<T, I> {
        self.dataset = Some(dataset.clone());
        let pending = self.manager.prepare(dataset, self.config.index.clone());
        self.pending = Some(PendingState {
            generation: pending.generation(),
            queued_region: None,
        });
        pending
    }

    /// Install the result of [`PendingRebuild::build`] and replay the queued
    /// region against it
    ///
    /// Results of superseded rebuilds are discarded. A failed build ends the
    /// pending state (keeping the queued region for the next query) and
    /// returns the error.
    pub fn finish_rebuild(
        &mut self,
        built: Result<IndexGeneration<T, I>>,
    ) -> Result<LayoutChange> {
        let generation = match built {
            Ok(generation) => generation,
            Err(e) => {
                if let Some(queued) = self.pending.take().and_then(|p| p.queued_region) {
                    self.region = queued;
                }
                return Err(e);
            }
        };

        if let Some(pending) = self.pending {
            if generation.generation != pending.generation {
                tracing::debug!(
                    "Discarding superseded generation {}, waiting for {}",
                    generation.generation,
                    pending.generation
                );
                return Ok(self.unchanged());
            }
        }

        if self.manager.install(generation).is_none() {
            return Ok(self.unchanged());
        }
        if let Some(queued) = self.pending.take().and_then(|p| p.queued_region) {
            self.region = queued;
        }
        self.refresh()
    }

    /// Press a published cluster
    ///
    /// Fails with `NoIndex` before any dataset is loaded and with
    /// `UnknownCluster` for ids not in the published snapshot.
    pub fn press_cluster(&mut self, cluster_id: ClusterId) -> Result<PressOutcome<T>> {
        let generation = self.manager.current().ok_or(ClusterError::NoIndex)?;
        let snapshot = Arc::clone(&self.snapshot);
        let cluster = snapshot
            .find_cluster(cluster_id)
            .ok_or(ClusterError::UnknownCluster(cluster_id))?;

        let options = ExpansionOptions::from_config(&self.config, self.screen_size);
        let outcome = on_cluster_selected(&generation, cluster, snapshot.index_id(cluster_id), &options)?;

        if let Some(handler) = self.press_handler.as_mut() {
            handler(outcome.cluster_id(), outcome.members());
        }
        Ok(outcome)
    }

    fn rebuild_now(&mut self, dataset: Dataset<T>) -> Result<()> {
        // A synchronous rebuild supersedes any outstanding two-phase one
        if let Some(queued) = self.pending.take().and_then(|p| p.queued_region) {
            self.region = queued;
        }
        self.manager.rebuild(dataset, self.config.index.clone())?;
        Ok(())
    }

    /// Query the current region, stabilize against the published snapshot
    /// and publish the result
    fn refresh(&mut self) -> Result<LayoutChange> {
        let Some(generation) = self.manager.current() else {
            return Ok(self.unchanged());
        };

        let bbox = self.region.to_bounding_box();
        let zoom = resolve_zoom(
            &bbox,
            self.screen_size,
            self.config.index.min_zoom,
            self.config.index.max_zoom,
        );

        let mut snapshot = generation.query(&bbox, zoom)?;
        let report = stabilize(
            &self.snapshot.features,
            &mut snapshot.features,
            self.config.match_policy,
        );
        snapshot.set_index_ids(report.index_ids);

        let previous = std::mem::replace(&mut self.snapshot, Arc::new(snapshot));
        let change = LayoutChange::between(&previous, &self.snapshot);
        tracing::debug!(
            "Published {} features at zoom {} ({:?})",
            self.snapshot.len(),
            zoom,
            change
        );
        Ok(change)
    }

    fn unchanged(&self) -> LayoutChange {
        LayoutChange::Unchanged {
            count: self.snapshot.len(),
        }
    }
}

impl<T, I> fmt::Debug for ClusterController<T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterController")
            .field("config", &self.config)
            .field("screen_size", &self.screen_size)
            .field("region", &self.region)
            .field("dataset", &self.dataset)
            .field("features", &self.snapshot.len())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexConfig;
    use serde_json::{Value, json};

    fn paris() -> Region {
        Region::new(48.855, 2.35, 0.05, 0.05)
    }

    fn cafes() -> Dataset<Value> {
        Dataset::new(vec![
            json!({ "location": { "latitude": 48.850, "longitude": 2.350 } }),
            json!({ "location": { "latitude": 48.852, "longitude": 2.352 } }),
            json!({ "location": { "latitude": 48.854, "longitude": 2.351 } }),
        ])
    }

    fn controller() -> ClusterController<Value> {
        ClusterController::new(ControllerConfig::default(), paris(), (256.0, 256.0)).unwrap()
    }

    #[test]
    fn test_layout_change() {
        let empty: ClusterSnapshot<()> = ClusterSnapshot::empty();
        assert_eq!(
            LayoutChange::between(&empty, &empty),
            LayoutChange::Unchanged { count: 0 }
        );
        assert!(!LayoutChange::Unchanged { count: 3 }.is_changed());
        assert!(
            LayoutChange::Changed {
                previous: 1,
                current: 2
            }
            .is_changed()
        );
    }

    #[test]
    fn test_new_rejects_bad_input() {
        let config = ControllerConfig::<Value> {
            cluster_press_max_children: 0,
            ..Default::default()
        };
        assert!(ClusterController::<Value>::new(config, paris(), (100.0, 100.0)).is_err());
        assert!(
            ClusterController::<Value>::new(ControllerConfig::default(), paris(), (0.0, 100.0))
                .is_err()
        );
    }

    #[test]
    fn test_region_change_before_dataset_is_noop() {
        let mut controller = controller();
        let change = controller
            .on_region_change(Region::new(10.0, 10.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(change, LayoutChange::Unchanged { count: 0 });
        assert_eq!(controller.region(), Region::new(10.0, 10.0, 1.0, 1.0));
        assert!(matches!(
            controller.press_cluster(ClusterId(1)),
            Err(ClusterError::NoIndex)
        ));
    }

    #[test]
    fn test_dataset_publishes_snapshot() {
        let mut controller = controller();
        let change = controller.set_dataset(cafes()).unwrap();
        assert!(change.is_changed());

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.point_count(), 3);
        assert_eq!(controller.zoom(), snapshot.zoom);
    }

    #[test]
    fn test_same_dataset_does_not_rebuild() {
        let mut controller = controller();
        let dataset = cafes();
        controller.set_dataset(dataset.clone()).unwrap();
        controller.set_dataset(dataset).unwrap();
        assert_eq!(controller.snapshot().generation, 1);

        controller.set_dataset(cafes()).unwrap();
        assert_eq!(controller.snapshot().generation, 2);
    }

    #[test]
    fn test_config_change_rebuilds() {
        let mut controller = controller();
        controller.set_dataset(cafes()).unwrap();

        let mut config = controller.config().clone();
        config.cluster_press_max_children = 10;
        controller.set_config(config.clone()).unwrap();
        assert_eq!(controller.snapshot().generation, 1);

        config.index = IndexConfig {
            radius: 10.0,
            ..config.index
        };
        controller.set_config(config).unwrap();
        assert_eq!(controller.snapshot().generation, 2);
    }

    #[test]
    fn test_wide_region_keeps_snapshot_and_region() {
        let mut controller = controller();
        controller.set_dataset(cafes()).unwrap();
        let before = controller.snapshot();

        let change = controller
            .on_region_change(Region::new(0.0, 0.0, 60.0, 80.0))
            .unwrap();
        assert!(!change.is_changed());
        assert!(Arc::ptr_eq(&before, &controller.snapshot()));
        assert_eq!(controller.region(), paris());
    }

    #[test]
    fn test_press_handler_is_called() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut controller = controller();
        controller.set_press_handler(move |id, members| {
            tx.send((id, members.map(<[_]>::len))).unwrap();
        });
        controller.set_dataset(cafes()).unwrap();
        controller
            .on_region_change(Region::new(48.852, 2.351, 5.0, 5.0))
            .unwrap();

        let cluster_id = controller
            .snapshot()
            .clusters()
            .next()
            .and_then(|c| c.cluster_id)
            .unwrap();
        let outcome = controller.press_cluster(cluster_id).unwrap();
        assert_eq!(outcome.members().map(<[_]>::len), Some(3));
        assert_eq!(rx.try_recv().unwrap(), (cluster_id, Some(3)));
    }

    #[test]
    fn test_unknown_cluster_press() {
        let mut controller = controller();
        controller.set_dataset(cafes()).unwrap();
        assert!(matches!(
            controller.press_cluster(ClusterId(u64::MAX)),
            Err(ClusterError::UnknownCluster(_))
        ));
    }
}
