//! Result Cache Correctness Tests
//!
//! Covers the caching contract end to end:
//!
//! 1. **At-most-once compute** - concurrent identical requests share one flight
//! 2. **Fingerprint sensitivity** - every parameter field, predicate values,
//!    and the dataset identity all key separate entries
//! 3. **Persistence** - entries survive a cache restart byte-for-byte
//! 4. **Corruption** - unreadable entries degrade to a miss
//! 5. **Clearing** - explicit wholesale eviction, memory and disk

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stormstitch::cache::{CacheConfig, Fingerprint, StrikeCache};
use stormstitch::query::{FilterField, Predicate};
use stormstitch::store::{InMemoryPointStore, PointStore};
use stormstitch::types::{Point, StrikeSet};
use stormstitch::{StitchParams, StrikePipelineBuilder};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

fn fingerprint() -> Fingerprint {
    Fingerprint::compute("dataset-a", &StitchParams::default(), &[])
}

async fn slow_compute(counter: Arc<AtomicUsize>) -> stormstitch::Result<StrikeSet> {
    counter.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(StrikeSet::empty())
}

fn flash(start_time: f64, count: usize) -> Vec<Point> {
    (0..count)
        .map(|i| {
            Point::new(
                start_time + i as f64 * 0.1,
                33.5 + 0.002 * i as f64,
                -101.8,
                5_000.0,
                10.0,
                1.0,
                8,
            )
        })
        .collect()
}

// =============================================================================
// At-Most-Once Compute
// =============================================================================

#[tokio::test]
async fn test_concurrent_requests_compute_once() {
    let cache = Arc::new(StrikeCache::in_memory());
    let counter = Arc::new(AtomicUsize::new(0));
    let fp = fingerprint();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let counter = counter.clone();
        handles.push(tokio::spawn(async move {
            cache.get_or_compute(fp, || slow_compute(counter)).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(
            handle
                .await
                .expect("Task panicked")
                .expect("Computation failed"),
        );
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1, "computed more than once");
    for result in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], result));
    }
}

#[tokio::test]
async fn test_distinct_fingerprints_compute_concurrently() {
    let cache = Arc::new(StrikeCache::in_memory());
    let counter = Arc::new(AtomicUsize::new(0));

    let fp_a = Fingerprint::compute("dataset-a", &StitchParams::default(), &[]);
    let fp_b = Fingerprint::compute("dataset-b", &StitchParams::default(), &[]);
    assert_ne!(fp_a, fp_b);

    let (a, b) = tokio::join!(
        cache.get_or_compute(fp_a, || slow_compute(counter.clone())),
        cache.get_or_compute(fp_b, || slow_compute(counter.clone())),
    );
    a.expect("First computation failed");
    b.expect("Second computation failed");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Fingerprint Sensitivity
// =============================================================================

#[test]
fn test_every_parameter_field_changes_the_fingerprint() {
    let base = StitchParams::default();
    let variants = [
        StitchParams { max_lightning_dist: 40_000.0, ..base.clone() },
        StitchParams { max_lightning_speed: 2.0e8, ..base.clone() },
        StitchParams { min_lightning_speed: 1.0, ..base.clone() },
        StitchParams { min_lightning_points: 299, ..base.clone() },
        StitchParams { max_lightning_time_threshold: 0.9, ..base.clone() },
        StitchParams { max_lightning_duration: 19.0, ..base.clone() },
        StitchParams { combine_strikes_with_intercepting_times: false, ..base.clone() },
        StitchParams { intercepting_times_extension_buffer: 9.0, ..base.clone() },
        StitchParams { intercepting_times_extension_max_distance: 14_000.0, ..base.clone() },
    ];

    let reference = Fingerprint::compute("dataset", &base, &[]);
    let mut all = vec![reference];
    for variant in &variants {
        let fp = Fingerprint::compute("dataset", variant, &[]);
        assert_ne!(fp, reference);
        all.push(fp);
    }
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), variants.len() + 1, "two variants collided");
}

#[test]
fn test_predicate_order_is_normalized() {
    let params = StitchParams::default();
    let a = Predicate::gte(FilterField::PowerDb, 10.0);
    let b = Predicate::lt(FilterField::Alt, 12_000.0);

    let forward = Fingerprint::compute("dataset", &params, &[a.clone(), b.clone()]);
    let reverse = Fingerprint::compute("dataset", &params, &[b.clone(), a.clone()]);
    assert_eq!(forward, reverse);

    let narrowed = Fingerprint::compute(
        "dataset",
        &params,
        &[a, Predicate::lt(FilterField::Alt, 11_000.0)],
    );
    assert_ne!(forward, narrowed);
}

#[tokio::test]
async fn test_ingest_invalidates_through_identity() {
    let store = Arc::new(InMemoryPointStore::with_points(&flash(0.0, 10)));
    let before = store.dataset_identity().await;

    let pipeline = StrikePipelineBuilder::new()
        .with_store_arc(store.clone())
        .with_worker_count(1)
        .build()
        .expect("Failed to build pipeline");
    let params = StitchParams {
        min_lightning_points: 5,
        ..StitchParams::default()
    };

    let first = pipeline
        .compute_strikes(&[], &params)
        .await
        .expect("First run failed");
    assert_eq!(first.point_count, 10);

    assert!(store.insert(Point::new(0.95, 33.52, -101.8, 5_000.0, 9.0, 1.0, 7)));
    assert_ne!(store.dataset_identity().await, before);

    let second = pipeline
        .compute_strikes(&[], &params)
        .await
        .expect("Second run failed");
    assert_eq!(second.point_count, 11, "stale result served after ingest");
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_entries_survive_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = CacheConfig {
        disabled: false,
        persist_dir: Some(temp_dir.path().to_path_buf()),
    };
    let fp = fingerprint();
    let counter = Arc::new(AtomicUsize::new(0));

    let first = {
        let cache = StrikeCache::new(config.clone()).expect("Failed to create cache");
        cache
            .get_or_compute(fp, || slow_compute(counter.clone()))
            .await
            .expect("Computation failed")
    };

    let cache = StrikeCache::new(config).expect("Failed to reopen cache");
    let second = cache
        .get_or_compute(fp, || slow_compute(counter.clone()))
        .await
        .expect("Lookup failed");

    assert_eq!(counter.load(Ordering::SeqCst), 1, "restart lost the entry");
    assert_eq!(*first, *second, "persisted entry did not round-trip");
}

#[tokio::test]
async fn test_corrupt_entry_is_a_miss() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = CacheConfig {
        disabled: false,
        persist_dir: Some(temp_dir.path().to_path_buf()),
    };
    let fp = fingerprint();
    let counter = Arc::new(AtomicUsize::new(0));

    {
        let cache = StrikeCache::new(config.clone()).expect("Failed to create cache");
        cache
            .get_or_compute(fp, || slow_compute(counter.clone()))
            .await
            .expect("Computation failed");
    }

    // Truncate the persisted entry to garbage
    let path = temp_dir.path().join(format!("{}.json", fp));
    assert!(path.exists());
    std::fs::write(&path, b"{not json").expect("Failed to corrupt entry");

    let cache = StrikeCache::new(config).expect("Failed to reopen cache");
    cache
        .get_or_compute(fp, || slow_compute(counter.clone()))
        .await
        .expect("Recomputation failed");
    assert_eq!(counter.load(Ordering::SeqCst), 2, "corrupt entry was served");

    // The recomputed entry replaced the corrupt file
    let contents = std::fs::read_to_string(&path).expect("Failed to read entry");
    assert!(contents.contains("strikes"));
}

// =============================================================================
// Clearing
// =============================================================================

#[tokio::test]
async fn test_clear_is_wholesale() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = CacheConfig {
        disabled: false,
        persist_dir: Some(temp_dir.path().to_path_buf()),
    };
    let cache = StrikeCache::new(config.clone()).expect("Failed to create cache");
    let counter = Arc::new(AtomicUsize::new(0));

    for identity in ["a", "b", "c"] {
        let fp = Fingerprint::compute(identity, &StitchParams::default(), &[]);
        cache
            .get_or_compute(fp, || slow_compute(counter.clone()))
            .await
            .expect("Computation failed");
    }
    assert_eq!(cache.entry_count(), 3);

    cache.clear().expect("Failed to clear cache");
    assert_eq!(cache.entry_count(), 0);

    // Disk entries are gone too: a fresh cache recomputes
    let reopened = StrikeCache::new(config).expect("Failed to reopen cache");
    let fp = Fingerprint::compute("a", &StitchParams::default(), &[]);
    reopened
        .get_or_compute(fp, || slow_compute(counter.clone()))
        .await
        .expect("Recomputation failed");
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_failed_computation_is_retried() {
    let cache = StrikeCache::in_memory();
    let fp = fingerprint();

    let failed: stormstitch::Result<Arc<StrikeSet>> = cache
        .get_or_compute(fp, || async {
            Err(stormstitch::Error::General("transient".to_string()))
        })
        .await;
    assert!(failed.is_err());

    let counter = Arc::new(AtomicUsize::new(0));
    cache
        .get_or_compute(fp, || slow_compute(counter.clone()))
        .await
        .expect("Retry failed");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
