//! Pipeline builder and entry point
//!
//! [`StrikePipeline`] wires the stages together behind one call,
//! `compute_strikes`: predicate selection, local projection, partitioned
//! stitching, retention, combining, and the result cache. The builder
//! lets callers swap the store and cache implementations while keeping
//! the stage order fixed.

use crate::cache::{default_cache_dir, CacheConfig, Fingerprint, StrikeCache};
use crate::config::Config;
use crate::dispatch::{worker_count_for_fraction, ParallelDispatcher};
use crate::error::{Error, Result};
use crate::geo::LocalProjection;
use crate::metrics;
use crate::params::StitchParams;
use crate::query::{FilterEngine, Predicate};
use crate::stitch::{retain_min_points, StitchedStrike, StrikeCombiner};
use crate::store::PointStore;
use crate::types::{BoundingBox, Point, PointId, Strike, StrikeSet, TrackPoint};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Builder for configuring the stitching pipeline
pub struct StrikePipelineBuilder {
    store: Option<Arc<dyn PointStore>>,
    cache: Option<Arc<StrikeCache>>,
    cache_config: Option<CacheConfig>,
    worker_count: Option<usize>,
    worker_fraction: f64,
    max_workers: usize,
}

impl StrikePipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            store: None,
            cache: None,
            cache_config: None,
            worker_count: None,
            worker_fraction: 0.5,
            max_workers: 0,
        }
    }

    /// Set the point store implementation
    pub fn with_store<S>(mut self, store: S) -> Self
    where
        S: PointStore + 'static,
    {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the point store implementation from an existing Arc
    ///
    /// Use this when you need to retain a reference to the store for
    /// direct operations such as further ingest.
    pub fn with_store_arc(mut self, store: Arc<dyn PointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Inject a result cache, shared with other pipelines if desired
    pub fn with_cache(mut self, cache: Arc<StrikeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Configure the cache the builder will construct itself
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = Some(config);
        self
    }

    /// Fix the partition worker count explicitly
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Derive the worker count from a fraction of available cores
    pub fn with_worker_fraction(mut self, fraction: f64) -> Self {
        self.worker_fraction = fraction;
        self
    }

    /// Apply runtime and cache settings from a loaded configuration
    pub fn with_config(mut self, config: &Config) -> Self {
        self.worker_fraction = config.runtime.worker_fraction;
        self.max_workers = config.runtime.max_workers;
        self.cache_config = Some(CacheConfig {
            disabled: !config.cache.enabled,
            persist_dir: config
                .cache
                .persist
                .then(|| default_cache_dir(&config.storage.data_dir)),
        });
        self
    }

    /// Build the pipeline with the configured components
    pub fn build(self) -> Result<StrikePipeline> {
        let store = self
            .store
            .ok_or_else(|| Error::Configuration("no point store configured".to_string()))?;

        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(StrikeCache::new(self.cache_config.unwrap_or_default())?),
        };

        let mut worker_count = self
            .worker_count
            .unwrap_or_else(|| worker_count_for_fraction(self.worker_fraction));
        if self.max_workers > 0 {
            worker_count = worker_count.min(self.max_workers);
        }

        Ok(StrikePipeline {
            store,
            cache,
            worker_count: worker_count.max(1),
        })
    }
}

impl Default for StrikePipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled stitching pipeline
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct StrikePipeline {
    store: Arc<dyn PointStore>,
    cache: Arc<StrikeCache>,
    worker_count: usize,
}

impl StrikePipeline {
    /// Get reference to the point store
    pub fn store(&self) -> &Arc<dyn PointStore> {
        &self.store
    }

    /// Get reference to the result cache
    pub fn cache(&self) -> &Arc<StrikeCache> {
        &self.cache
    }

    /// Number of partition workers used for large selections
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Drop every cached result, in memory and on disk
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()?;
        metrics::update_cache_entries(0);
        Ok(())
    }

    /// Compute the strikes for one request
    ///
    /// The full pipeline run: validate, fingerprint, then either answer
    /// from the cache or select, project, stitch, and combine. Two calls
    /// with the same predicates, parameters, and dataset return the same
    /// cached `Arc<StrikeSet>` without recomputing.
    pub async fn compute_strikes(
        &self,
        predicates: &[Predicate],
        params: &StitchParams,
    ) -> Result<Arc<StrikeSet>> {
        let started = Instant::now();
        params.validate()?;
        for predicate in predicates {
            predicate.validate()?;
        }

        let identity = self.store.dataset_identity().await;
        let fingerprint = Fingerprint::compute(&identity, params, predicates);
        metrics::record_cache_lookup(self.cache.peek(fingerprint).is_some());

        let result = self
            .cache
            .get_or_compute(fingerprint, || self.run(predicates, params))
            .await;
        metrics::update_cache_entries(self.cache.entry_count());

        match &result {
            Ok(set) => {
                metrics::update_strikes_emitted(set.len());
                metrics::record_run(started.elapsed().as_secs_f64(), true);
                info!(
                    fingerprint = %fingerprint,
                    strikes = set.len(),
                    points = set.point_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "stitching run complete"
                );
            }
            Err(e) => {
                metrics::record_run(started.elapsed().as_secs_f64(), false);
                warn!(error = %e, "stitching run failed");
            }
        }
        result
    }

    /// Compute strikes and write one CSV file per strike
    ///
    /// Returns the paths written. The selection is re-materialized for
    /// the export so that cached results can still resolve their member
    /// ids to records.
    pub async fn export_strikes(
        &self,
        predicates: &[Predicate],
        params: &StitchParams,
        dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let set = self.compute_strikes(predicates, params).await?;
        let selection = FilterEngine::new(self.store.clone())
            .select(predicates)
            .await?;
        set.export_csv(&selection.points, dir)
    }

    /// One uncached pipeline run
    async fn run(&self, predicates: &[Predicate], params: &StitchParams) -> Result<StrikeSet> {
        let filter_started = Instant::now();
        let selection = FilterEngine::new(self.store.clone())
            .select(predicates)
            .await?;
        metrics::record_stage("filter", filter_started.elapsed().as_secs_f64());
        metrics::update_points_selected(selection.len());

        let projection = match LocalProjection::for_points(&selection.points) {
            Some(projection) => projection,
            None => return Ok(StrikeSet::empty()),
        };
        let track: Vec<TrackPoint> = selection
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| projection.project(p, i as PointId))
            .collect();

        let stitch_started = Instant::now();
        let dispatcher = ParallelDispatcher::new(params.clone(), self.worker_count);
        let stitched = dispatcher.stitch_all(&track).await?;
        metrics::record_stage("stitch", stitch_started.elapsed().as_secs_f64());

        let combine_started = Instant::now();
        let retained = retain_min_points(stitched, params);
        let combined = StrikeCombiner::new(&track, params).combine(retained);
        metrics::record_stage("combine", combine_started.elapsed().as_secs_f64());

        let strikes = combined
            .into_iter()
            .map(|s| materialize(s, &selection.points))
            .collect();
        Ok(StrikeSet {
            strikes,
            computed_at: chrono::Utc::now(),
            point_count: selection.len(),
        })
    }
}

/// Attach geographic bounds to a finished strike
fn materialize(stitched: StitchedStrike, points: &[Point]) -> Strike {
    let StitchedStrike {
        points: members,
        start_time,
        end_time,
        correlations,
    } = stitched;

    let mut bounding_box = BoundingBox::from_point(&points[members[0] as usize]);
    for &id in &members[1..] {
        bounding_box.include(&points[id as usize]);
    }

    Strike {
        points: members,
        start_time,
        end_time,
        bounding_box,
        correlations,
    }
}
