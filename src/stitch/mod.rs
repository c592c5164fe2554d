//! Stitching core
//!
//! Turns a filtered, time-sorted point slice into strikes:
//!
//! - [`DisjointSet`]: union-find arena backing strike merges
//! - [`StitchEngine`]: single-pass incremental clustering
//! - [`StrikeCombiner`]: merge pass over strikes with intercepting times
//!
//! # Architecture
//!
//! ```text
//! [TrackPoints] --> StitchEngine --> [StitchedStrike*] --> retain --> StrikeCombiner
//!                      |    \
//!                (index)    (DisjointSet)
//! ```

pub mod combiner;
pub mod disjoint;
pub mod engine;

pub use combiner::StrikeCombiner;
pub use disjoint::DisjointSet;
pub use engine::{retain_min_points, StitchEngine, StitchStats, StitchedStrike};
