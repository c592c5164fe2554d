//! Filter engine: predicate pushdown over the point store
//!
//! The engine never scans points itself. It validates the predicate list,
//! pushes it down to the store's indexed query path, and materializes the
//! matching records as a [`FilteredSet`] whose position order defines the
//! dense [`crate::types::PointId`] space for the rest of the run.

use crate::error::Result;
use crate::query::Predicate;
use crate::store::PointStore;
use crate::types::{Point, RecordId};
use std::sync::Arc;
use tracing::debug;

/// The materialized result of one predicate selection
///
/// `records[i]` and `points[i]` describe the same detection; `i` itself
/// is the dense `PointId` every downstream stage uses. Order is ascending
/// (`time_unix`, record id), guaranteed by the store contract.
#[derive(Debug, Clone)]
pub struct FilteredSet {
    /// Store record ids, in selection order
    pub records: Vec<RecordId>,
    /// Point records, in selection order
    pub points: Vec<Point>,
}

impl FilteredSet {
    /// Number of selected points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when nothing matched
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Read-only selection stage in front of the stitching pipeline
pub struct FilterEngine {
    store: Arc<dyn PointStore>,
}

impl FilterEngine {
    /// Create a filter engine over a store
    pub fn new(store: Arc<dyn PointStore>) -> Self {
        Self { store }
    }

    /// Select the points matching every predicate
    ///
    /// Fails fast on the first invalid predicate, before any retrieval.
    /// An empty predicate list selects the whole dataset.
    pub async fn select(&self, predicates: &[Predicate]) -> Result<FilteredSet> {
        for predicate in predicates {
            predicate.validate()?;
        }

        let records = self.store.query(predicates).await?;
        let points = self.store.fetch(&records).await?;
        debug!(
            predicates = predicates.len(),
            selected = points.len(),
            "filter selection complete"
        );
        Ok(FilteredSet { records, points })
    }
}
