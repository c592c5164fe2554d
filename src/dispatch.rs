//! Parallel partition dispatcher
//!
//! Splits the time-sorted selection into contiguous chunks, stitches the
//! chunks on blocking worker threads, then reconciles strikes that touch
//! a chunk boundary. Workers share nothing: each receives an immutable
//! copy of its slice and returns an immutable strike list over a oneshot
//! channel.
//!
//! # Architecture
//!
//! ```text
//! [TrackPoints] --plan--> chunk 0..N --spawn_blocking--> [strikes 0..N]
//!                                            |                 |
//!                                       (Semaphore)        (barrier)
//!                                                              v
//!                                                    boundary reconciliation
//! ```
//!
//! # Boundary reconciliation
//!
//! A strike may legitimately span a chunk boundary, and the duration
//! gate makes cluster assignment near a cut depend on history the worker
//! did not see. Reconciliation therefore re-runs the stitching pass over
//! every chain of strikes whose buffered windows chain across a cut
//! time. Chains with more than `max_lightning_time_threshold` of clear
//! time on both sides of every cut are untouched; their worker-local
//! result is already the global one. The outcome is identical for any
//! worker count, including one.

use crate::error::{PartitionError, Result};
use crate::params::StitchParams;
use crate::stitch::{StitchEngine, StitchedStrike};
use crate::types::{PointId, TrackPoint};
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, warn};

/// Minimum core chunk size worth the spawn overhead
const MIN_CHUNK_POINTS: usize = 2_048;

/// Worker count derived from a fraction of the available cores
///
/// Matches operational convention: `0.5` uses half the machine. Always
/// at least one.
pub fn worker_count_for_fraction(fraction: f64) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ((cores as f64 * fraction) as usize).max(1)
}

/// How the selection is split across workers
///
/// Core ranges partition the slice; extended ranges add the overlap
/// each worker needs to see the recent history of its first points.
struct PartitionPlan {
    core: Vec<Range<usize>>,
    extended: Vec<Range<usize>>,
    /// Time of the first core point of chunks 1..N
    cut_times: Vec<f64>,
}

impl PartitionPlan {
    fn build(points: &[TrackPoint], worker_count: usize, overlap: f64) -> Self {
        let len = points.len();
        let mut starts: Vec<usize> = (0..worker_count).map(|w| w * len / worker_count).collect();
        starts.dedup();

        let mut core = Vec::with_capacity(starts.len());
        let mut extended = Vec::with_capacity(starts.len());
        let mut cut_times = Vec::new();
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(len);
            if start == end {
                continue;
            }
            let cut = points[start].time_unix;
            if i > 0 {
                cut_times.push(cut);
            }
            let ext_start = points.partition_point(|p| p.time_unix < cut - overlap);
            core.push(start..end);
            extended.push(ext_start.min(start)..end);
        }
        Self {
            core,
            extended,
            cut_times,
        }
    }
}

/// Fan-out/fan-in stitching over blocking worker threads
///
/// Cheap to construct per run. Concurrency is bounded by a semaphore so
/// a large partition count cannot oversubscribe the blocking pool.
pub struct ParallelDispatcher {
    params: StitchParams,
    worker_count: usize,
    semaphore: Arc<Semaphore>,
}

impl ParallelDispatcher {
    /// Create a dispatcher for `worker_count` partitions
    pub fn new(params: StitchParams, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            params,
            worker_count,
            semaphore: Arc::new(Semaphore::new(worker_count)),
        }
    }

    /// Stitch the selection, partitioned when it is large enough
    ///
    /// Returns unfiltered strikes; retention and combining run once,
    /// downstream, so that partitioning never changes the result.
    pub async fn stitch_all(&self, points: &[TrackPoint]) -> Result<Vec<StitchedStrike>> {
        if self.worker_count == 1 || points.len() < MIN_CHUNK_POINTS * 2 {
            let chunk = points.to_vec();
            let params = self.params.clone();
            let (strikes, _) = tokio::task::spawn_blocking(move || {
                run_partition(&chunk, &params, chunk.first().map_or(0, |p| p.id))
            })
            .await
            .map_err(|e| PartitionError::Worker {
                partition: 0,
                message: e.to_string(),
            })??;
            return Ok(strikes);
        }

        let overlap = 2.0 * self.params.max_lightning_time_threshold;
        let plan = PartitionPlan::build(points, self.worker_count, overlap);
        info!(
            points = points.len(),
            partitions = plan.core.len(),
            overlap_secs = overlap,
            "dispatching partitioned stitch"
        );

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut receivers = Vec::with_capacity(plan.core.len());
        for (w, ext) in plan.extended.iter().enumerate() {
            let chunk: Vec<TrackPoint> = points[ext.clone()].to_vec();
            let core_start_id = points[plan.core[w].start].id;
            let params = self.params.clone();
            let semaphore = self.semaphore.clone();
            let cancelled = cancelled.clone();
            let (tx, rx) = oneshot::channel();

            tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                if cancelled.load(Ordering::Acquire) {
                    let _ = tx.send(Err(PartitionError::Worker {
                        partition: w,
                        message: "cancelled after sibling failure".to_string(),
                    }));
                    return;
                }
                let outcome =
                    tokio::task::spawn_blocking(move || run_partition(&chunk, &params, core_start_id))
                        .await;
                let message = match outcome {
                    Ok(Ok((strikes, stats))) => {
                        debug!(
                            partition = w,
                            points = stats.points_processed,
                            strikes = strikes.len(),
                            "partition stitched"
                        );
                        Ok(strikes)
                    }
                    Ok(Err(e)) => Err(e),
                    Err(join) => Err(PartitionError::Worker {
                        partition: w,
                        message: join.to_string(),
                    }),
                };
                let _ = tx.send(message);
            });
            receivers.push((w, rx));
        }

        // Barrier: every partition reports before reconciliation starts
        let total = receivers.len();
        let mut strikes = Vec::new();
        let mut failures: Vec<PartitionError> = Vec::new();
        for (w, rx) in receivers {
            match rx.await {
                Ok(Ok(partition_strikes)) => strikes.extend(partition_strikes),
                Ok(Err(e)) => {
                    cancelled.store(true, Ordering::Release);
                    warn!(partition = w, error = %e, "partition failed");
                    failures.push(e);
                }
                Err(_) => {
                    cancelled.store(true, Ordering::Release);
                    failures.push(PartitionError::WorkerLost { partition: w });
                }
            }
        }
        if !failures.is_empty() {
            return Err(PartitionError::Aggregate {
                failed: failures.len(),
                total,
                first: failures[0].to_string(),
            }
            .into());
        }

        Ok(self.reconcile(points, strikes, &plan.cut_times))
    }

    /// Re-stitch every boundary-touching chain of strikes
    fn reconcile(
        &self,
        points: &[TrackPoint],
        mut strikes: Vec<StitchedStrike>,
        cut_times: &[f64],
    ) -> Vec<StitchedStrike> {
        strikes.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then_with(|| a.points[0].cmp(&b.points[0]))
        });
        let threshold = self.params.max_lightning_time_threshold;

        // Chains of strikes whose windows sit within the time threshold of
        // each other; a strike never links across a wider gap, so chains
        // are independent.
        let mut final_strikes = Vec::with_capacity(strikes.len());
        let mut rework_ids: BTreeSet<PointId> = BTreeSet::new();
        let mut chain: Vec<StitchedStrike> = Vec::new();
        let mut chain_end = f64::NEG_INFINITY;
        let mut chain_touches_cut = false;
        let mut chains_reworked = 0usize;

        for strike in strikes {
            if !chain.is_empty() && strike.start_time - chain_end > threshold {
                flush_chain(
                    &mut chain,
                    chain_touches_cut,
                    &mut final_strikes,
                    &mut rework_ids,
                    &mut chains_reworked,
                );
                chain_touches_cut = false;
                chain_end = f64::NEG_INFINITY;
            }
            chain_end = chain_end.max(strike.end_time);
            chain_touches_cut |= cut_times.iter().any(|&cut| {
                strike.start_time - threshold <= cut && cut <= strike.end_time + threshold
            });
            chain.push(strike);
        }
        flush_chain(
            &mut chain,
            chain_touches_cut,
            &mut final_strikes,
            &mut rework_ids,
            &mut chains_reworked,
        );

        if !rework_ids.is_empty() {
            let subset: Vec<TrackPoint> = rework_ids
                .iter()
                .filter_map(|&id| {
                    points
                        .binary_search_by(|p| p.id.cmp(&id))
                        .ok()
                        .map(|pos| points[pos])
                })
                .collect();
            debug!(
                chains = chains_reworked,
                points = subset.len(),
                "re-stitching boundary chains"
            );
            let (reworked, _) = StitchEngine::new(&subset, &self.params).stitch_all();
            final_strikes.extend(reworked);
        }

        final_strikes.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then_with(|| a.points[0].cmp(&b.points[0]))
        });
        final_strikes
    }
}

fn flush_chain(
    chain: &mut Vec<StitchedStrike>,
    touches_cut: bool,
    final_strikes: &mut Vec<StitchedStrike>,
    rework_ids: &mut BTreeSet<PointId>,
    chains_reworked: &mut usize,
) {
    if chain.is_empty() {
        return;
    }
    if touches_cut {
        for strike in chain.drain(..) {
            rework_ids.extend(strike.points);
        }
        *chains_reworked += 1;
    } else {
        final_strikes.append(chain);
    }
}

/// Stitch one partition on a blocking thread
///
/// Validates the slice before touching the engine, then drops strikes
/// made entirely of overlap points, which the previous partition owns.
fn run_partition(
    chunk: &[TrackPoint],
    params: &StitchParams,
    core_start_id: PointId,
) -> std::result::Result<(Vec<StitchedStrike>, crate::stitch::StitchStats), PartitionError> {
    for pair in chunk.windows(2) {
        if !pair[1].time_unix.is_finite() || pair[1].time_unix < pair[0].time_unix {
            return Err(PartitionError::Worker {
                partition: 0,
                message: format!(
                    "point {} breaks time ordering ({} after {})",
                    pair[1].id, pair[1].time_unix, pair[0].time_unix
                ),
            });
        }
    }
    if let Some(first) = chunk.first() {
        if !first.time_unix.is_finite() {
            return Err(PartitionError::Worker {
                partition: 0,
                message: format!("point {} has a non-finite time", first.id),
            });
        }
    }

    let (strikes, stats) = StitchEngine::new(chunk, params).stitch_all();
    let owned = strikes
        .into_iter()
        .filter(|s| s.points.last().is_some_and(|&id| id >= core_start_id))
        .collect();
    Ok((owned, stats))
}
