//! Spatio-temporal candidate index
//!
//! Brute-force stitching is O(n^2) in the number of points; at the
//! dataset sizes this engine targets that is not tractable. The index
//! cuts the candidate set per point to a small neighborhood:
//!
//! - **Time buckets**: overlapping windows along the monotonic time
//!   axis. Bucket width is `max(max_lightning_duration, 4 * threshold)`
//!   so buckets stay non-degenerate when the duration cap is small, and
//!   consecutive buckets overlap by `max_lightning_time_threshold` so a
//!   pair within the threshold is never split across bucket boundaries.
//! - **Spatial grid**: inside each bucket, a uniform grid over projected
//!   `(x, y)` with cell edge `max_lightning_dist`. Any pair within the
//!   distance threshold lands in the same or an adjacent cell; altitude
//!   is left to the exact squared-distance check in the stitcher.
//!
//! Candidate lists are always returned in ascending point-id order, so
//! downstream iteration never depends on hash-map ordering.

use crate::params::StitchParams;
use crate::types::{PointId, TrackPoint};
use std::collections::BTreeMap;
use tracing::debug;

type Cell = (i64, i64);

struct Bucket {
    /// Grid cells to member ids, sorted by cell for deterministic walks
    cells: BTreeMap<Cell, Vec<PointId>>,
}

/// Overlapping time buckets crossed with a coarse spatial grid
///
/// Built once per run (or per partition) over an immutable, time-sorted
/// slice of projected points.
pub struct SpatioTemporalIndex {
    buckets: Vec<Bucket>,
    origin: f64,
    stride: f64,
    width: f64,
    cell_edge: f64,
}

impl SpatioTemporalIndex {
    /// Build the index over a time-sorted point slice
    pub fn build(points: &[TrackPoint], params: &StitchParams) -> Self {
        let width = params
            .max_lightning_duration
            .max(4.0 * params.max_lightning_time_threshold);
        let overlap = params.max_lightning_time_threshold;
        let stride = width - overlap;
        let cell_edge = params.max_lightning_dist;
        let origin = points.first().map(|p| p.time_unix).unwrap_or(0.0);

        let bucket_count = points
            .last()
            .map(|p| ((p.time_unix - origin) / stride) as usize + 1)
            .unwrap_or(0);
        let mut buckets: Vec<Bucket> = (0..bucket_count)
            .map(|_| Bucket {
                cells: BTreeMap::new(),
            })
            .collect();

        let mut index = Self {
            buckets: Vec::new(),
            origin,
            stride,
            width,
            cell_edge,
        };

        for point in points {
            let (first, last) = index.covering_buckets(point.time_unix, bucket_count);
            let cell = index.cell_of(point);
            for bucket in buckets.iter_mut().take(last + 1).skip(first) {
                bucket.cells.entry(cell).or_default().push(point.id);
            }
        }

        debug!(
            points = points.len(),
            buckets = buckets.len(),
            bucket_width = width,
            cell_edge,
            "spatio-temporal index built"
        );
        index.buckets = buckets;
        index
    }

    /// Candidate neighbors of a point, ascending by id
    ///
    /// Gathers every member of the same or an adjacent grid cell in every
    /// bucket covering the point's time. The list includes the query
    /// point itself when it was indexed; callers filter by id. Spurious
    /// candidates are expected and harmless, the stitcher re-checks exact
    /// thresholds.
    pub fn candidates(&self, point: &TrackPoint) -> Vec<PointId> {
        if self.buckets.is_empty() {
            return Vec::new();
        }
        let (first, last) = self.covering_buckets(point.time_unix, self.buckets.len());
        let (cx, cy) = self.cell_of(point);

        let mut ids = Vec::new();
        for bucket in &self.buckets[first..=last] {
            for dx in -1..=1 {
                for dy in -1..=1 {
                    if let Some(members) = bucket.cells.get(&(cx + dx, cy + dy)) {
                        ids.extend_from_slice(members);
                    }
                }
            }
        }
        // Points sitting in two overlapping buckets appear twice
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Number of time buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn cell_of(&self, point: &TrackPoint) -> Cell {
        (
            (point.x / self.cell_edge).floor() as i64,
            (point.y / self.cell_edge).floor() as i64,
        )
    }

    /// Inclusive range of bucket indices whose window covers `t`
    fn covering_buckets(&self, t: f64, bucket_count: usize) -> (usize, usize) {
        let offset = t - self.origin;
        let last = ((offset / self.stride) as usize).min(bucket_count.saturating_sub(1));
        // The previous bucket still covers `t` when it falls inside the overlap
        let first = if last > 0 && offset < (last - 1) as f64 * self.stride + self.width {
            last - 1
        } else {
            last
        };
        (first, last)
    }
}
