//! Pipeline assembly: filter, stitch, combine, cache behind one entry point

pub mod builder;

pub use builder::{StrikePipeline, StrikePipelineBuilder};
