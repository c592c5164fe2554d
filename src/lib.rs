//! stormstitch - Spatio-temporal stitching of lightning detections
//!
//! This library turns raw point detections from a mapping network into
//! physically coherent strikes:
//! - Predicate pushdown selection over an indexed point store
//! - Local planar projection with squared-distance math on the hot path
//! - Single-pass union-find stitching with a spatio-temporal index
//! - Partitioned fan-out with exact boundary reconciliation
//! - Fingerprinted result cache with single-flight computation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod geo;
pub mod index;
pub mod params;
pub mod stitch;
pub mod store;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Predicate AST and the filter engine in front of the store
pub mod query;

// Re-export main types
pub use engine::{StrikePipeline, StrikePipelineBuilder};
pub use error::{Error, Result};
pub use params::StitchParams;
pub use types::{Point, PointId, Strike, StrikeSet};
