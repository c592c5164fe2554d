//! Single-pass incremental stitching
//!
//! Walks the time-sorted point slice once. For every point it gathers
//! index candidates among earlier points, gates them on time, distance,
//! duration and propagation speed, and either opens a new strike or joins
//! (and possibly merges) existing ones. All geometry is squared, no
//! square roots or trig on the hot path.
//!
//! The engine is deterministic: ties on temporal proximity resolve to the
//! lower point id, merged strikes keep the lowest strike id, and output
//! ordering is fixed by (start time, first member id).

use crate::geo::dist_sq;
use crate::params::StitchParams;
use crate::stitch::DisjointSet;
use crate::types::{PointId, TrackPoint};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Floor for the squared time delta in the speed quotient
///
/// Near-simultaneous detections would otherwise produce unbounded
/// apparent speeds from timestamp jitter alone.
const MIN_DELTA_T_SQ: f64 = 1e-5;

/// One strike as produced by the stitching pass
///
/// Members are global point ids in ascending order. Correlations record
/// which earlier point each joining point attached to, child-ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct StitchedStrike {
    /// Member point ids, ascending
    pub points: Vec<PointId>,
    /// Time of the earliest member
    pub start_time: f64,
    /// Time of the latest member
    pub end_time: f64,
    /// (parent, child) attachment pairs
    pub correlations: Vec<(PointId, PointId)>,
}

impl StitchedStrike {
    /// Number of member points
    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

/// Counters reported after a stitching pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StitchStats {
    /// Points examined
    pub points_processed: usize,
    /// Strikes opened as singletons
    pub strikes_opened: usize,
    /// Strike-to-strike merges triggered by bridging points
    pub strike_merges: usize,
    /// Strikes emitted before retention
    pub strikes_emitted: usize,
    /// Strikes dropped by the retention filter
    pub strikes_discarded: usize,
}

/// Per-strike working state during the pass
struct Slot {
    /// Member positions within the input slice
    members: Vec<u32>,
    start_time: f64,
    last_time: f64,
    correlations: Vec<(PointId, PointId)>,
}

/// Single-pass clustering over a time-sorted point slice
///
/// The slice must be sorted ascending by time with ascending ids. Ids
/// need not be contiguous; boundary reconciliation re-stitches gathered
/// subsets of the selection.
pub struct StitchEngine<'a> {
    points: &'a [TrackPoint],
    params: &'a StitchParams,
}

impl<'a> StitchEngine<'a> {
    /// Create an engine over a prepared slice
    pub fn new(points: &'a [TrackPoint], params: &'a StitchParams) -> Self {
        Self { points, params }
    }

    /// Run the pass and apply the minimum-size retention filter
    pub fn stitch(&self) -> (Vec<StitchedStrike>, StitchStats) {
        let (strikes, mut stats) = self.stitch_all();
        let retained = retain_min_points(strikes, self.params);
        stats.strikes_discarded = stats.strikes_emitted - retained.len();
        (retained, stats)
    }

    /// Run the pass and emit every strike, singletons included
    ///
    /// Partitioned runs use this variant so that retention happens once,
    /// after boundary reconciliation, never per worker.
    pub fn stitch_all(&self) -> (Vec<StitchedStrike>, StitchStats) {
        let mut stats = StitchStats::default();
        if self.points.is_empty() {
            return (Vec::new(), stats);
        }

        let index = crate::index::SpatioTemporalIndex::build(self.points, self.params);
        let pos_by_id: HashMap<PointId, usize> = self
            .points
            .iter()
            .enumerate()
            .map(|(pos, p)| (p.id, pos))
            .collect();
        let max_dist_sq = self.params.max_dist_sq();
        let (min_speed_sq, max_speed_sq) = self.params.speed_bounds_sq();

        let mut dsu = DisjointSet::new();
        let mut slots: Vec<Slot> = Vec::new();
        // Position of each processed point to its slot id
        let mut assignment: Vec<u32> = Vec::with_capacity(self.points.len());

        for (pos, point) in self.points.iter().enumerate() {
            stats.points_processed += 1;

            // Strike root -> (best dt, best member position, best dist_sq)
            let mut qualifiers: BTreeMap<u32, (f64, usize, f64)> = BTreeMap::new();
            for cid in index.candidates(point) {
                if cid >= point.id {
                    continue;
                }
                let Some(&cpos) = pos_by_id.get(&cid) else {
                    continue;
                };
                let candidate = &self.points[cpos];

                let dt = point.time_unix - candidate.time_unix;
                if dt > self.params.max_lightning_time_threshold {
                    continue;
                }
                let d2 = dist_sq(point, candidate);
                if d2 > max_dist_sq {
                    continue;
                }
                let root = dsu.find(assignment[cpos]);
                if point.time_unix - slots[root as usize].start_time
                    > self.params.max_lightning_duration
                {
                    continue;
                }

                // Keep the temporally nearest member per strike, lower id
                // on ties
                match qualifiers.get_mut(&root) {
                    Some(best) if dt > best.0 || (dt == best.0 && cpos >= best.1) => {}
                    Some(best) => *best = (dt, cpos, d2),
                    None => {
                        qualifiers.insert(root, (dt, cpos, d2));
                    }
                }
            }

            // The speed gate applies to the nearest member of each strike
            qualifiers.retain(|_, &mut (dt, _, d2)| {
                let speed_sq = d2 / (dt * dt).max(MIN_DELTA_T_SQ);
                (min_speed_sq..=max_speed_sq).contains(&speed_sq)
            });

            if qualifiers.is_empty() {
                let slot = dsu.make_set();
                slots.push(Slot {
                    members: vec![pos as u32],
                    start_time: point.time_unix,
                    last_time: point.time_unix,
                    correlations: Vec::new(),
                });
                assignment.push(slot);
                stats.strikes_opened += 1;
                continue;
            }

            // Attach to the overall nearest member; strict comparison so
            // the lowest strike root wins dt ties
            let mut parent_pos = usize::MAX;
            let mut parent_dt = f64::INFINITY;
            let mut merged_root = u32::MAX;
            for (&root, &(dt, cpos, _)) in &qualifiers {
                if dt < parent_dt {
                    parent_dt = dt;
                    parent_pos = cpos;
                }
                merged_root = if merged_root == u32::MAX {
                    root
                } else {
                    stats.strike_merges += 1;
                    dsu.union(merged_root, root)
                };
            }
            self.merge_slot_metadata(&mut slots, &mut dsu, &qualifiers, merged_root);

            let root = merged_root as usize;
            slots[root].members.push(pos as u32);
            slots[root].last_time = point.time_unix;
            slots[root]
                .correlations
                .push((self.points[parent_pos].id, point.id));
            assignment.push(merged_root);
        }

        let strikes = self.finalize(&mut dsu, slots);
        stats.strikes_emitted = strikes.len();
        debug!(
            points = stats.points_processed,
            opened = stats.strikes_opened,
            merges = stats.strike_merges,
            emitted = stats.strikes_emitted,
            "stitch pass complete"
        );
        (strikes, stats)
    }

    /// Fold the losing slots' metadata into the surviving root
    fn merge_slot_metadata(
        &self,
        slots: &mut [Slot],
        dsu: &mut DisjointSet,
        qualifiers: &BTreeMap<u32, (f64, usize, f64)>,
        merged_root: u32,
    ) {
        for &root in qualifiers.keys() {
            if root == merged_root {
                continue;
            }
            debug_assert_eq!(dsu.find(root), merged_root);
            let (start, last) = {
                let loser = &slots[root as usize];
                (loser.start_time, loser.last_time)
            };
            let members = std::mem::take(&mut slots[root as usize].members);
            let correlations = std::mem::take(&mut slots[root as usize].correlations);
            let winner = &mut slots[merged_root as usize];
            winner.members.extend(members);
            winner.correlations.extend(correlations);
            winner.start_time = winner.start_time.min(start);
            winner.last_time = winner.last_time.max(last);
        }
    }

    /// Materialize slots into output strikes with global ids
    fn finalize(&self, dsu: &mut DisjointSet, slots: Vec<Slot>) -> Vec<StitchedStrike> {
        let mut strikes = Vec::new();
        for (id, mut slot) in slots.into_iter().enumerate() {
            if dsu.find(id as u32) != id as u32 {
                continue;
            }
            slot.members.sort_unstable();
            slot.correlations.sort_unstable_by_key(|&(_, child)| child);
            let first = slot.members[0] as usize;
            let last = *slot.members.last().unwrap_or(&slot.members[0]) as usize;
            strikes.push(StitchedStrike {
                start_time: self.points[first].time_unix,
                end_time: self.points[last].time_unix,
                points: slot
                    .members
                    .iter()
                    .map(|&m| self.points[m as usize].id)
                    .collect(),
                correlations: slot.correlations,
            });
        }
        strikes.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then_with(|| a.points[0].cmp(&b.points[0]))
        });
        strikes
    }
}

/// Drop strikes smaller than the configured minimum
pub fn retain_min_points(
    strikes: Vec<StitchedStrike>,
    params: &StitchParams,
) -> Vec<StitchedStrike> {
    strikes
        .into_iter()
        .filter(|s| s.point_count() >= params.min_lightning_points)
        .collect()
}
