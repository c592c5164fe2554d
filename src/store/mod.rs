//! Point store abstraction
//!
//! The persistent relational store that feeds the engine lives outside
//! this crate. [`PointStore`] is the seam: it resolves predicates to
//! record ids against per-field indexes, hands back raw records, and
//! reports a stable identity for the ingested dataset so that cached
//! results can be tied to the exact data they were computed from.
//!
//! [`InMemoryPointStore`] is the reference implementation used by the
//! pipeline tests and by callers that load a dataset wholesale.

mod memory;

pub use memory::InMemoryPointStore;

use crate::error::StoreError;
use crate::query::Predicate;
use crate::types::{Point, RecordId};
use async_trait::async_trait;

/// Core trait for point storage backends
#[async_trait]
pub trait PointStore: Send + Sync + 'static {
    /// Resolve predicates to matching record ids
    ///
    /// Predicates are AND-combined. The result is sorted by
    /// (`time_unix`, record id) ascending, which downstream stages rely
    /// on. An empty predicate list matches every record.
    async fn query(&self, predicates: &[Predicate]) -> Result<Vec<RecordId>, StoreError>;

    /// Fetch records by id, preserving the requested order
    async fn fetch(&self, ids: &[RecordId]) -> Result<Vec<Point>, StoreError>;

    /// Stable identity of the ingested dataset
    ///
    /// Two stores holding the same records report the same identity.
    /// Any ingest that changes the content changes the identity, which
    /// in turn invalidates every cached result computed against it.
    async fn dataset_identity(&self) -> String;

    /// Get store statistics
    fn stats(&self) -> StoreStats;
}

/// Store statistics
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    /// Number of records currently held
    pub total_records: u64,
    /// Ingest attempts skipped as exact duplicates
    pub duplicates_skipped: u64,
    /// Number of predicate queries served
    pub queries_served: u64,
}
