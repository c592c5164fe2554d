//! Partition Invariance Tests
//!
//! The dispatcher must produce exactly the strikes a single worker
//! produces, for any worker count. These tests stitch the same synthetic
//! storm night with 1, 4, and 16 partitions and require identical output,
//! at the dispatcher level and through the full pipeline.

use stormstitch::dispatch::ParallelDispatcher;
use stormstitch::geo::LocalProjection;
use stormstitch::store::InMemoryPointStore;
use stormstitch::types::{Point, PointId, TrackPoint};
use stormstitch::{StitchParams, StrikePipelineBuilder};

// =============================================================================
// Synthetic Storm Generation
// =============================================================================

/// Deterministic PCG-style generator so every run sees the same storm
struct Rng(u64);

impl Rng {
    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

/// A night of storms: `flashes` flashes of `points_per_flash` detections
///
/// Most flashes are separated by several seconds; every seventh follows
/// its predecessor within half a second at the same cell, so stitching
/// chains regularly straddle partition boundaries.
fn storm_night(flashes: usize, points_per_flash: usize, seed: u64) -> Vec<Point> {
    let mut rng = Rng(seed);
    let mut points = Vec::with_capacity(flashes * points_per_flash);
    let mut clock = 0.0;
    let mut lat = 33.8;
    let mut lon = -101.5;

    for flash in 0..flashes {
        if flash % 7 == 6 {
            clock += rng.range(0.3, 0.5);
        } else {
            clock += rng.range(4.0, 15.0);
            lat = rng.range(33.0, 35.0);
            lon = rng.range(-103.0, -100.0);
        }

        let mut t = clock;
        let (mut flat, mut flon) = (lat, lon);
        let mut alt = rng.range(3_000.0, 9_000.0);
        for _ in 0..points_per_flash {
            points.push(Point::new(
                t,
                flat,
                flon,
                alt,
                rng.range(5.0, 30.0),
                rng.range(0.5, 2.0),
                6 + (rng.next_f64() * 8.0) as u32,
            ));
            t += rng.range(0.05, 0.15);
            flat += rng.range(-0.002, 0.002);
            flon += rng.range(-0.002, 0.002);
            alt += rng.range(-150.0, 150.0);
        }
        clock = t;
    }
    points
}

fn project(points: &[Point]) -> Vec<TrackPoint> {
    let projection = LocalProjection::for_points(points).expect("Non-empty point set");
    points
        .iter()
        .enumerate()
        .map(|(i, p)| projection.project(p, i as PointId))
        .collect()
}

// =============================================================================
// Dispatcher-Level Invariance
// =============================================================================

#[tokio::test]
async fn test_dispatcher_agrees_across_worker_counts() {
    let points = storm_night(120, 100, 0x5eed);
    let track = project(&points);
    let params = StitchParams::default();

    let reference = ParallelDispatcher::new(params.clone(), 1)
        .stitch_all(&track)
        .await
        .expect("Single-worker stitch failed");
    assert!(!reference.is_empty());

    for workers in [4, 16] {
        let partitioned = ParallelDispatcher::new(params.clone(), workers)
            .stitch_all(&track)
            .await
            .expect("Partitioned stitch failed");
        assert_eq!(
            reference, partitioned,
            "worker count {} changed the result",
            workers
        );
    }
}

#[tokio::test]
async fn test_large_storm_invariance() {
    // 100k detections across a thousand flashes
    let points = storm_night(1_000, 100, 0xca11);
    assert_eq!(points.len(), 100_000);
    let track = project(&points);
    let params = StitchParams::default();

    let reference = ParallelDispatcher::new(params.clone(), 1)
        .stitch_all(&track)
        .await
        .expect("Single-worker stitch failed");

    for workers in [4, 16] {
        let partitioned = ParallelDispatcher::new(params.clone(), workers)
            .stitch_all(&track)
            .await
            .expect("Partitioned stitch failed");
        assert_eq!(
            reference.len(),
            partitioned.len(),
            "worker count {} changed the strike count",
            workers
        );
        assert_eq!(reference, partitioned);
    }
}

#[tokio::test]
async fn test_no_point_lost_or_duplicated() {
    let points = storm_night(120, 100, 0xd00d);
    let track = project(&points);

    let strikes = ParallelDispatcher::new(StitchParams::default(), 8)
        .stitch_all(&track)
        .await
        .expect("Partitioned stitch failed");

    let mut seen = vec![false; track.len()];
    for strike in &strikes {
        for &id in &strike.points {
            assert!(!seen[id as usize], "point {} appears twice", id);
            seen[id as usize] = true;
        }
    }
    assert!(seen.iter().all(|&s| s), "some points were dropped");
}

// =============================================================================
// Pipeline-Level Invariance
// =============================================================================

#[tokio::test]
async fn test_pipeline_agrees_across_worker_counts() {
    let points = storm_night(120, 100, 0xbeef);
    let params = StitchParams {
        min_lightning_points: 30,
        ..StitchParams::default()
    };

    let mut results = Vec::new();
    for workers in [1, 4, 16] {
        let pipeline = StrikePipelineBuilder::new()
            .with_store(InMemoryPointStore::with_points(&points))
            .with_worker_count(workers)
            .build()
            .expect("Failed to build pipeline");
        let set = pipeline
            .compute_strikes(&[], &params)
            .await
            .expect("Failed to compute strikes");
        results.push(set.strikes.clone());
    }

    assert!(!results[0].is_empty());
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], results[2]);
}

#[tokio::test]
async fn test_repeat_runs_are_identical() {
    let points = storm_night(60, 80, 0xfeed);
    let params = StitchParams {
        min_lightning_points: 20,
        ..StitchParams::default()
    };

    let pipeline = StrikePipelineBuilder::new()
        .with_store(InMemoryPointStore::with_points(&points))
        .with_cache_config(stormstitch::cache::CacheConfig {
            disabled: true,
            persist_dir: None,
        })
        .with_worker_count(4)
        .build()
        .expect("Failed to build pipeline");

    let first = pipeline
        .compute_strikes(&[], &params)
        .await
        .expect("First run failed");
    let second = pipeline
        .compute_strikes(&[], &params)
        .await
        .expect("Second run failed");
    assert_eq!(first.strikes, second.strikes);
}
