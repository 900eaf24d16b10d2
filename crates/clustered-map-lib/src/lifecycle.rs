//! Index lifecycle: building, publishing and reading index generations
//!
//! A [`Dataset`] plus an [`IndexConfig`] is turned into an immutable
//! [`IndexGeneration`]. The [`IndexManager`] publishes generations by swapping
//! a pointer under a lock, so [`IndexReader`]s on other threads only ever see
//! complete indexes.

use crate::accessor::ResolvedAccessor;
use crate::geo_math::BoundingBox;
use crate::grid_index::GridClusterIndex;
use crate::index::{ClusterIndex, ClusterSnapshot, Feature};
use crate::{ClusterError, IndexConfig, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable list of items whose identity is its allocation
///
/// Cloning shares the allocation; building a new `Dataset`, even from equal
/// items, is a dataset change that triggers an index rebuild.
pub struct Dataset<T>(Arc<[Arc<T>]>);

impl<T> Dataset<T> {
    pub fn new(items: Vec<T>) -> Self {
        items.into_iter().collect()
    }

    /// Build from items that are already shared
    pub fn from_shared(items: Vec<Arc<T>>) -> Self {
        Self(items.into())
    }

    #[inline]
    pub fn items(&self) -> &[Arc<T>] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether both handles point to the same allocation
    #[inline]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> FromIterator<T> for Dataset<T> {
    fn from_iter<It: IntoIterator<Item = T>>(iter: It) -> Self {
        Self(iter.into_iter().map(Arc::new).collect())
    }
}

impl<T> Clone for Dataset<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Dataset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset").field("len", &self.len()).finish()
    }
}

/// One immutable, fully built index together with what it was built from
pub struct IndexGeneration<T, I = GridClusterIndex<T>> {
    /// Monotonic build number, starting at 1
    pub generation: u64,
    pub dataset: Dataset<T>,
    pub config: IndexConfig<T>,
    pub accessor: ResolvedAccessor<T>,
    pub index: I,
}

impl<T, I: ClusterIndex<T>> IndexGeneration<T, I> {
    /// Read-only query of this generation's index
    pub fn query(&self, bbox: &BoundingBox, zoom: u8) -> Result<ClusterSnapshot<T>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("lifecycle::query");

        let features = self.index.query(bbox, zoom)?;
        tracing::debug!(
            "Generation {} returned {} features at zoom {}",
            self.generation,
            features.len(),
            zoom
        );
        Ok(ClusterSnapshot::new(*bbox, zoom, self.generation, features))
    }
}

impl<T, I> fmt::Debug for IndexGeneration<T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexGeneration")
            .field("generation", &self.generation)
            .field("dataset", &self.dataset)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A rebuild that has been scheduled but not built yet
///
/// Building is pure CPU work and the value is `Send`, so it can be moved to
/// a worker thread; the result goes back through [`IndexManager::install`].
pub struct PendingRebuild<T, I = GridClusterIndex<T>> {
    generation: u64,
    dataset: Dataset<T>,
    config: IndexConfig<T>,
    _index: PhantomData<fn() -> I>,
}

impl<T, I> PendingRebuild<T, I> {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T, I> PendingRebuild<T, I>
where
    T: Serialize + Send + Sync + 'static,
    I: ClusterIndex<T>,
{
    /// Extract every item's coordinate and bulk-load a new index
    pub fn build(self) -> Result<IndexGeneration<T, I>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("lifecycle::build");

        self.config.validate()?;
        let accessor = self.config.accessor.resolve()?;

        let features = self
            .dataset
            .items()
            .par_iter()
            .enumerate()
            .map(|(i, item)| {
                accessor
                    .coordinate(item)
                    .map(|coordinate| Feature::leaf(coordinate, Arc::clone(item)))
                    .map_err(|e| match e {
                        ClusterError::Configuration(msg) => {
                            ClusterError::Configuration(format!("item {}: {}", i, msg))
                        }
                        other => other,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let index = I::load(&self.config, features)?;
        tracing::debug!(
            "Built index generation {} for {} items",
            self.generation,
            self.dataset.len()
        );

        Ok(IndexGeneration {
            generation: self.generation,
            dataset: self.dataset,
            config: self.config,
            accessor,
            index,
        })
    }
}

type SharedGeneration<T, I> = Arc<RwLock<Option<Arc<IndexGeneration<T, I>>>>>;

/// Owns the current index generation and decides when to replace it
pub struct IndexManager<T, I = GridClusterIndex<T>> {
    current: SharedGeneration<T, I>,
    /// Last generation number handed out by [`IndexManager::prepare`]
    issued: u64,
}

impl<T, I> Default for IndexManager<T, I> {
    fn default() -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            issued: 0,
        }
    }
}

impl<T, I> IndexManager<T, I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest published generation
    pub fn current(&self) -> Option<Arc<IndexGeneration<T, I>>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handle that always sees the latest published generation
    pub fn reader(&self) -> IndexReader<T, I> {
        IndexReader {
            current: Arc::clone(&self.current),
        }
    }

    /// A rebuild is needed on first load, when the dataset allocation changed
    /// or when any index parameter changed
    pub fn needs_rebuild(&self, dataset: &Dataset<T>, config: &IndexConfig<T>) -> bool {
        match self.current() {
            Some(current) => !current.dataset.same_as(dataset) || current.config != *config,
            None => true,
        }
    }

    /// Reserve the next generation number for a rebuild
    pub fn prepare(&mut self, dataset: Dataset<T>, config: IndexConfig<T>) -> PendingRebuild<T, I> {
        self.issued += 1;
        PendingRebuild {
            generation: self.issued,
            dataset,
            config,
            _index: PhantomData,
        }
    }

    /// Publish a built generation
    ///
    /// Returns `None` and leaves the current generation in place when
    /// `generation` is not newer than it.
    pub fn install(
        &self,
        generation: IndexGeneration<T, I>,
    ) -> Option<Arc<IndexGeneration<T, I>>> {
        let generation = Arc::new(generation);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.as_ref() {
            if existing.generation >= generation.generation {
                tracing::debug!(
                    "Discarding generation {}, generation {} is already published",
                    generation.generation,
                    existing.generation
                );
                return None;
            }
        }
        *current = Some(Arc::clone(&generation));
        Some(generation)
    }

    pub fn query(&self, bbox: &BoundingBox, zoom: u8) -> Result<ClusterSnapshot<T>>
    where
        I: ClusterIndex<T>,
    {
        self.current().ok_or(ClusterError::NoIndex)?.query(bbox, zoom)
    }
}

impl<T, I> IndexManager<T, I>
where
    T: Serialize + Send + Sync + 'static,
    I: ClusterIndex<T>,
{
    /// Build and publish a new generation synchronously
    pub fn rebuild(
        &mut self,
        dataset: Dataset<T>,
        config: IndexConfig<T>,
    ) -> Result<Arc<IndexGeneration<T, I>>> {
        let generation = self.prepare(dataset, config).build()?;
        let number = generation.generation;
        self.install(generation)
            .or_else(|| self.current())
            .ok_or_else(|| {
                ClusterError::IndexQuery(format!("generation {} was not published", number))
            })
    }

    /// Current generation, rebuilt first if [`Self::needs_rebuild`] says so
    pub fn ensure(
        &mut self,
        dataset: &Dataset<T>,
        config: &IndexConfig<T>,
    ) -> Result<Arc<IndexGeneration<T, I>>> {
        if !self.needs_rebuild(dataset, config) {
            if let Some(current) = self.current() {
                return Ok(current);
            }
        }
        self.rebuild(dataset.clone(), config.clone())
    }
}

/// Cloneable read handle onto the manager's published generation
pub struct IndexReader<T, I = GridClusterIndex<T>> {
    current: SharedGeneration<T, I>,
}

impl<T, I> IndexReader<T, I> {
    pub fn current(&self) -> Option<Arc<IndexGeneration<T, I>>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn generation(&self) -> Option<u64> {
        self.current().map(|current| current.generation)
    }

    pub fn query(&self, bbox: &BoundingBox, zoom: u8) -> Result<ClusterSnapshot<T>>
    where
        I: ClusterIndex<T>,
    {
        self.current().ok_or(ClusterError::NoIndex)?.query(bbox, zoom)
    }
}

impl<T, I> Clone for IndexReader<T, I> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}
