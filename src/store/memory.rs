//! In-memory point store with per-field sorted indexes
//!
//! Reference implementation of [`PointStore`]. Every indexed field keeps
//! a sorted `(value, record id)` column, so predicate resolution is two
//! binary searches per predicate instead of a full scan. Ingest
//! deduplicates on a CRC-64 content hash and folds the same hashes into
//! the dataset identity.

use crate::error::StoreError;
use crate::query::{FilterOp, Predicate};
use crate::store::{PointStore, StoreStats};
use crate::types::{Point, RecordId};
use async_trait::async_trait;
use crc::{Crc, CRC_64_ECMA_182};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tracing::debug;

const CONTENT_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Number of indexed fields (one sorted column each)
const FIELD_COUNT: usize = 7;

struct Inner {
    points: Vec<Point>,
    seen_hashes: HashSet<u64>,
    hash_sum: u64,
    /// Sorted (value, record) columns, invalidated by ingest
    indexes: Option<Vec<Vec<(f64, RecordId)>>>,
}

/// In-memory reference implementation of [`PointStore`]
///
/// # Example
///
/// ```rust
/// use stormstitch::store::{InMemoryPointStore, PointStore};
/// use stormstitch::query::Predicate;
/// use stormstitch::query::FilterField;
/// use stormstitch::types::Point;
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let store = InMemoryPointStore::new();
/// store.insert_batch(&[
///     Point::new(10.0, 33.0, -101.0, 5_000.0, 12.0, 0.8, 9),
///     Point::new(11.0, 33.1, -101.1, 5_200.0, 14.0, 0.9, 6),
/// ]);
///
/// let ids = store
///     .query(&[Predicate::gte(FilterField::NumStations, 7.0)])
///     .await
///     .unwrap();
/// assert_eq!(ids, vec![0]);
/// # });
/// ```
pub struct InMemoryPointStore {
    inner: RwLock<Inner>,
    duplicates_skipped: AtomicU64,
    queries_served: AtomicU64,
}

impl InMemoryPointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                points: Vec::new(),
                seen_hashes: HashSet::new(),
                hash_sum: 0,
                indexes: None,
            }),
            duplicates_skipped: AtomicU64::new(0),
            queries_served: AtomicU64::new(0),
        }
    }

    /// Create a store pre-loaded with a batch of records
    pub fn with_points(points: &[Point]) -> Self {
        let store = Self::new();
        store.insert_batch(points);
        store
    }

    /// Ingest one record
    ///
    /// Returns `false` when an identical record was already ingested; the
    /// duplicate is skipped and does not change the dataset identity.
    pub fn insert(&self, point: Point) -> bool {
        let hash = content_hash(&point);
        let mut inner = self.inner.write();
        if !inner.seen_hashes.insert(hash) {
            self.duplicates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
            return false;
        }
        inner.hash_sum = inner.hash_sum.wrapping_add(hash);
        inner.points.push(point);
        inner.indexes = None;
        true
    }

    /// Ingest a batch, returning how many records were new
    pub fn insert_batch(&self, points: &[Point]) -> usize {
        let mut ingested = 0;
        let mut inner = self.inner.write();
        for point in points {
            let hash = content_hash(point);
            if !inner.seen_hashes.insert(hash) {
                self.duplicates_skipped.fetch_add(1, AtomicOrdering::Relaxed);
                continue;
            }
            inner.hash_sum = inner.hash_sum.wrapping_add(hash);
            inner.points.push(*point);
            ingested += 1;
        }
        if ingested > 0 {
            inner.indexes = None;
        }
        ingested
    }

    fn ensure_indexes(inner: &mut Inner) {
        if inner.indexes.is_some() {
            return;
        }
        let mut columns: Vec<Vec<(f64, RecordId)>> =
            vec![Vec::with_capacity(inner.points.len()); FIELD_COUNT];
        for (record, point) in inner.points.iter().enumerate() {
            let record = record as RecordId;
            for (slot, column) in columns.iter_mut().enumerate() {
                column.push((field_value(point, slot), record));
            }
        }
        for column in &mut columns {
            column.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
        }
        debug!(records = inner.points.len(), "rebuilt field indexes");
        inner.indexes = Some(columns);
    }
}

impl Default for InMemoryPointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PointStore for InMemoryPointStore {
    async fn query(&self, predicates: &[Predicate]) -> Result<Vec<RecordId>, StoreError> {
        self.queries_served.fetch_add(1, AtomicOrdering::Relaxed);

        let mut inner = self.inner.write();
        Self::ensure_indexes(&mut inner);
        let columns = inner
            .indexes
            .as_ref()
            .map(|c| c.as_slice())
            .unwrap_or_default();

        let mut result: Vec<RecordId> = if predicates.is_empty() {
            (0..inner.points.len() as RecordId).collect()
        } else {
            // Resolve each predicate against its column, then intersect
            // the candidate lists smallest-first.
            let mut candidate_lists: Vec<Vec<RecordId>> = predicates
                .iter()
                .map(|p| column_range(&columns[field_slot(p)], p.op, p.value))
                .collect();
            candidate_lists.sort_by_key(Vec::len);

            let mut acc = candidate_lists.remove(0);
            for other in &candidate_lists {
                acc.retain(|id| other.binary_search(id).is_ok());
                if acc.is_empty() {
                    break;
                }
            }
            acc
        };

        let points = &inner.points;
        result.sort_by(|&a, &b| {
            points[a as usize]
                .time_unix
                .partial_cmp(&points[b as usize].time_unix)
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });

        debug!(
            predicates = predicates.len(),
            matched = result.len(),
            "resolved predicate query"
        );
        Ok(result)
    }

    async fn fetch(&self, ids: &[RecordId]) -> Result<Vec<Point>, StoreError> {
        let inner = self.inner.read();
        let mut points = Vec::with_capacity(ids.len());
        for &id in ids {
            let point = inner
                .points
                .get(id as usize)
                .ok_or(StoreError::RecordNotFound(id))?;
            points.push(*point);
        }
        Ok(points)
    }

    async fn dataset_identity(&self) -> String {
        let inner = self.inner.read();
        format!("{:016x}-{}", inner.hash_sum, inner.points.len())
    }

    fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        StoreStats {
            total_records: inner.points.len() as u64,
            duplicates_skipped: self.duplicates_skipped.load(AtomicOrdering::Relaxed),
            queries_served: self.queries_served.load(AtomicOrdering::Relaxed),
        }
    }
}

fn content_hash(p: &Point) -> u64 {
    let mut digest = CONTENT_CRC.digest();
    digest.update(&p.time_unix.to_bits().to_le_bytes());
    digest.update(&p.lat.to_bits().to_le_bytes());
    digest.update(&p.lon.to_bits().to_le_bytes());
    digest.update(&p.alt.to_bits().to_le_bytes());
    digest.update(&p.power_db.to_bits().to_le_bytes());
    digest.update(&p.reduced_chi2.to_bits().to_le_bytes());
    digest.update(&p.num_stations.to_le_bytes());
    digest.finalize()
}

fn field_slot(p: &Predicate) -> usize {
    p.field as usize
}

fn field_value(point: &Point, slot: usize) -> f64 {
    use crate::query::FilterField;
    match FilterField::ALL[slot] {
        FilterField::TimeUnix => point.time_unix,
        FilterField::Lat => point.lat,
        FilterField::Lon => point.lon,
        FilterField::Alt => point.alt,
        FilterField::PowerDb => point.power_db,
        FilterField::ReducedChi2 => point.reduced_chi2,
        FilterField::NumStations => point.num_stations as f64,
    }
}

/// Slice a sorted column by operator, returning record ids sorted ascending
fn column_range(column: &[(f64, RecordId)], op: FilterOp, value: f64) -> Vec<RecordId> {
    let lower_gte = column.partition_point(|&(v, _)| v < value);
    let lower_gt = column.partition_point(|&(v, _)| v <= value);
    let slice = match op {
        FilterOp::Gte => &column[lower_gte..],
        FilterOp::Gt => &column[lower_gt..],
        FilterOp::Lte => &column[..lower_gt],
        FilterOp::Lt => &column[..lower_gte],
        FilterOp::Eq => &column[lower_gte..lower_gt],
    };
    let mut ids: Vec<RecordId> = slice.iter().map(|&(_, id)| id).collect();
    ids.sort_unstable();
    ids
}
