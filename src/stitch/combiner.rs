//! Post-pass strike merging
//!
//! The single-pass stitcher can split one physical flash into several
//! strikes when its branches develop in parallel. The combiner repairs
//! this with a second look: any two strikes whose buffered time windows
//! intersect and whose geometry overlaps at a start point are merged,
//! transitively.

use crate::geo::dist_sq;
use crate::params::StitchParams;
use crate::stitch::{DisjointSet, StitchedStrike};
use crate::types::{TimeWindow, TrackPoint};
use tracing::debug;

/// Merge pass over strikes with intercepting time windows
///
/// Holds the same projected slice the stitcher ran over; strike members
/// index into it.
pub struct StrikeCombiner<'a> {
    points: &'a [TrackPoint],
    params: &'a StitchParams,
}

impl<'a> StrikeCombiner<'a> {
    /// Create a combiner over the stitcher's point slice
    pub fn new(points: &'a [TrackPoint], params: &'a StitchParams) -> Self {
        Self { points, params }
    }

    /// Combine strikes whose windows and geometry overlap
    ///
    /// Returns the input (sorted) untouched when combining is disabled.
    /// The pass is idempotent: running it on its own output changes
    /// nothing, because all transitive merges happen in one invocation.
    pub fn combine(&self, mut strikes: Vec<StitchedStrike>) -> Vec<StitchedStrike> {
        strikes.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then(a.end_time.total_cmp(&b.end_time))
                .then_with(|| a.points.first().cmp(&b.points.first()))
        });
        if !self.params.combine_strikes_with_intercepting_times || strikes.len() < 2 {
            return strikes;
        }

        let buffer = self.params.intercepting_times_extension_buffer;
        let windows: Vec<TimeWindow> = strikes
            .iter()
            .map(|s| TimeWindow::new_unchecked(s.start_time, s.end_time).extended(buffer))
            .collect();

        let mut dsu = DisjointSet::new();
        for _ in 0..strikes.len() {
            dsu.make_set();
        }
        let mut merges = 0usize;
        for i in 0..strikes.len() {
            for j in (i + 1)..strikes.len() {
                if windows[j].start > windows[i].end {
                    break;
                }
                if dsu.same_set(i as u32, j as u32) {
                    continue;
                }
                if self.starts_intercept(&strikes[i], &strikes[j]) {
                    dsu.union(i as u32, j as u32);
                    merges += 1;
                }
            }
        }
        if merges == 0 {
            return strikes;
        }
        debug!(before = strikes.len(), merges, "combiner merged strikes");
        self.regroup(&mut dsu, strikes)
    }

    /// True when either strike's first point lies within the intercept
    /// distance of any point of the other
    fn starts_intercept(&self, a: &StitchedStrike, b: &StitchedStrike) -> bool {
        let limit = self.params.intercept_dist_sq();
        let offset = self.points[0].id;
        let at = |id: u32| &self.points[(id - offset) as usize];

        let b_start = at(b.points[0]);
        if a.points.iter().any(|&id| dist_sq(at(id), b_start) <= limit) {
            return true;
        }
        let a_start = at(a.points[0]);
        b.points.iter().any(|&id| dist_sq(at(id), a_start) <= limit)
    }

    /// Concatenate each merge group into one strike
    fn regroup(&self, dsu: &mut DisjointSet, strikes: Vec<StitchedStrike>) -> Vec<StitchedStrike> {
        let mut groups: Vec<Option<StitchedStrike>> = (0..strikes.len()).map(|_| None).collect();
        for (i, strike) in strikes.into_iter().enumerate() {
            let root = dsu.find(i as u32) as usize;
            match &mut groups[root] {
                Some(acc) => {
                    acc.points.extend(strike.points);
                    acc.correlations.extend(strike.correlations);
                    acc.start_time = acc.start_time.min(strike.start_time);
                    acc.end_time = acc.end_time.max(strike.end_time);
                }
                slot => *slot = Some(strike),
            }
        }

        let mut combined: Vec<StitchedStrike> = groups
            .into_iter()
            .flatten()
            .map(|mut s| {
                s.points.sort_unstable();
                s.correlations.sort_unstable_by_key(|&(_, child)| child);
                s
            })
            .collect();
        combined.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then_with(|| a.points[0].cmp(&b.points[0]))
        });
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointId;

    fn track(id: PointId, t: f64, x: f64, y: f64) -> TrackPoint {
        TrackPoint {
            id,
            time_unix: t,
            x,
            y,
            z: 0.0,
        }
    }

    fn strike(points: Vec<PointId>, start: f64, end: f64) -> StitchedStrike {
        StitchedStrike {
            points,
            start_time: start,
            end_time: end,
            correlations: Vec::new(),
        }
    }

    fn params() -> StitchParams {
        StitchParams {
            combine_strikes_with_intercepting_times: true,
            intercepting_times_extension_buffer: 10.0,
            intercepting_times_extension_max_distance: 15_000.0,
            ..StitchParams::default()
        }
    }

    #[test]
    fn test_close_starts_merge() {
        let points = vec![
            track(0, 0.0, 0.0, 0.0),
            track(1, 1.0, 1_000.0, 0.0),
            track(2, 5.0, 2_000.0, 0.0),
            track(3, 6.0, 3_000.0, 0.0),
        ];
        let strikes = vec![strike(vec![0, 1], 0.0, 1.0), strike(vec![2, 3], 5.0, 6.0)];
        let combined = StrikeCombiner::new(&points, &params()).combine(strikes);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].points, vec![0, 1, 2, 3]);
        assert_eq!(combined[0].start_time, 0.0);
        assert_eq!(combined[0].end_time, 6.0);
    }

    #[test]
    fn test_distant_strikes_stay_apart() {
        let points = vec![
            track(0, 0.0, 0.0, 0.0),
            track(1, 1.0, 1_000.0, 0.0),
            track(2, 5.0, 100_000.0, 0.0),
            track(3, 6.0, 101_000.0, 0.0),
        ];
        let strikes = vec![strike(vec![0, 1], 0.0, 1.0), strike(vec![2, 3], 5.0, 6.0)];
        let combined = StrikeCombiner::new(&points, &params()).combine(strikes);
        assert_eq!(combined.len(), 2);
    }

    #[test]
    fn test_buffered_windows_must_intersect() {
        let p = StitchParams {
            intercepting_times_extension_buffer: 1.0,
            ..params()
        };
        // Same location but 10 s apart; 1 s buffers leave a gap
        let points = vec![
            track(0, 0.0, 0.0, 0.0),
            track(1, 0.5, 100.0, 0.0),
            track(2, 10.0, 0.0, 0.0),
            track(3, 10.5, 100.0, 0.0),
        ];
        let strikes = vec![strike(vec![0, 1], 0.0, 0.5), strike(vec![2, 3], 10.0, 10.5)];
        let combined = StrikeCombiner::new(&points, &p).combine(strikes);
        assert_eq!(combined.len(), 2);
    }

    #[test]
    fn test_proximity_is_symmetric() {
        // B's start is far from every point of A, but A's start sits next
        // to B's tail, so the pair still merges.
        let points = vec![
            track(0, 0.0, 0.0, 0.0),
            track(1, 1.0, 14_000.0, 0.0),
            track(2, 2.0, 50_000.0, 0.0),
            track(3, 3.0, 1_000.0, 0.0),
        ];
        let strikes = vec![strike(vec![0, 1], 0.0, 1.0), strike(vec![2, 3], 2.0, 3.0)];
        let combined = StrikeCombiner::new(&points, &params()).combine(strikes);
        assert_eq!(combined.len(), 1);
    }

    #[test]
    fn test_transitive_merge() {
        // A-B intercept and B-C intercept; A-C do not, yet all three join
        let points = vec![
            track(0, 0.0, 0.0, 0.0),
            track(1, 1.0, 14_000.0, 0.0),
            track(2, 2.0, 28_000.0, 0.0),
        ];
        let strikes = vec![
            strike(vec![0], 0.0, 0.0),
            strike(vec![1], 1.0, 1.0),
            strike(vec![2], 2.0, 2.0),
        ];
        let combined = StrikeCombiner::new(&points, &params()).combine(strikes);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].points, vec![0, 1, 2]);
    }

    #[test]
    fn test_disabled_combine_is_passthrough() {
        let p = StitchParams {
            combine_strikes_with_intercepting_times: false,
            ..params()
        };
        let points = vec![
            track(0, 0.0, 0.0, 0.0),
            track(1, 1.0, 100.0, 0.0),
        ];
        let strikes = vec![strike(vec![1], 1.0, 1.0), strike(vec![0], 0.0, 0.0)];
        let combined = StrikeCombiner::new(&points, &p).combine(strikes);
        assert_eq!(combined.len(), 2);
        // Still sorted by start time
        assert_eq!(combined[0].points, vec![0]);
    }

    #[test]
    fn test_idempotent() {
        let points = vec![
            track(0, 0.0, 0.0, 0.0),
            track(1, 1.0, 14_000.0, 0.0),
            track(2, 2.0, 28_000.0, 0.0),
            track(3, 40.0, 500_000.0, 0.0),
        ];
        let strikes = vec![
            strike(vec![0], 0.0, 0.0),
            strike(vec![1], 1.0, 1.0),
            strike(vec![2], 2.0, 2.0),
            strike(vec![3], 40.0, 40.0),
        ];
        let params = params();
        let combiner = StrikeCombiner::new(&points, &params);
        let once = combiner.combine(strikes);
        let twice = combiner.combine(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_and_single() {
        let points = vec![track(0, 0.0, 0.0, 0.0)];
        let params = params();
        let combiner = StrikeCombiner::new(&points, &params);
        assert!(combiner.combine(Vec::new()).is_empty());
        let one = combiner.combine(vec![strike(vec![0], 0.0, 0.0)]);
        assert_eq!(one.len(), 1);
    }
}
