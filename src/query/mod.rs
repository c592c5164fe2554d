//! Predicate filtering over the point store
//!
//! This module provides the selection stage of the pipeline:
//! - A small predicate AST over the indexed point fields
//! - A filter engine that pushes predicates down to the store
//!
//! # Architecture
//!
//! ```text
//! [Predicate list] --validate--> [FilterEngine] --pushdown--> [PointStore]
//!                                      |
//!                                      v
//!                                [FilteredSet]   (defines the PointId space)
//! ```

pub mod filter;
pub mod predicate;

pub use filter::{FilterEngine, FilteredSet};
pub use predicate::{FilterField, FilterOp, Predicate};
