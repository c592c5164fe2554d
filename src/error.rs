//! Error types for the stitching engine

use thiserror::Error;

/// Main error type for the stitching engine
#[derive(Error, Debug)]
pub enum Error {
    /// Predicate error
    #[error("Predicate error: {0}")]
    Predicate(#[from] PredicateError),

    /// Parameter error
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// Point store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Partition error
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// General error
    #[error("{0}")]
    General(String),
}

/// Predicate validation errors
///
/// Raised before any point retrieval happens, so a bad filter never costs
/// a scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// Field name does not match any indexed point field
    #[error("Unknown filter field: {0}")]
    UnknownField(String),

    /// Operator is not supported for the field
    #[error("Operator {op} is not supported for field {field}")]
    UnsupportedOperator {
        /// Field the predicate targets
        field: String,
        /// The rejected operator
        op: String,
    },

    /// Comparison value is NaN or infinite
    #[error("Non-finite comparison value for field {field}")]
    NonFiniteValue {
        /// Field the predicate targets
        field: String,
    },
}

/// Stitching parameter validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// Value must be strictly positive
    #[error("{field} must be positive, got {value}")]
    NonPositive {
        /// Parameter name
        field: &'static str,
        /// The rejected value
        value: f64,
    },

    /// Value must not be negative
    #[error("{field} must not be negative, got {value}")]
    Negative {
        /// Parameter name
        field: &'static str,
        /// The rejected value
        value: f64,
    },

    /// Value is NaN or infinite
    #[error("{field} must be finite")]
    NonFinite {
        /// Parameter name
        field: &'static str,
    },

    /// Speed bounds are inverted
    #[error("min_lightning_speed {min} exceeds max_lightning_speed {max}")]
    SpeedOrdering {
        /// Lower speed bound
        min: f64,
        /// Upper speed bound
        max: f64,
    },

    /// A strike of zero points is not a strike
    #[error("min_lightning_points must be at least 1")]
    ZeroMinPoints,
}

/// Point store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Requested record id does not exist
    #[error("Record not found: {0}")]
    RecordNotFound(u64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Partitioned computation errors
///
/// Worker failures are collected behind the barrier and surface as a
/// single aggregate; partial strike sets never escape the dispatcher.
#[derive(Error, Debug)]
pub enum PartitionError {
    /// A worker returned an error
    #[error("Partition {partition} failed: {message}")]
    Worker {
        /// Index of the failed partition
        partition: usize,
        /// Worker error message
        message: String,
    },

    /// A worker panicked or its result channel closed
    #[error("Worker for partition {partition} was lost before completing")]
    WorkerLost {
        /// Index of the lost partition
        partition: usize,
    },

    /// Aggregate of all failures observed in one run
    #[error("{failed} of {total} partitions failed; first failure: {first}")]
    Aggregate {
        /// Number of failed partitions
        failed: usize,
        /// Total number of partitions
        total: usize,
        /// Message of the first failure in partition order
        first: String,
    },
}

/// Result cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cache directory is unusable
    #[error("Invalid cache directory {path}: {message}")]
    Directory {
        /// The offending path
        path: String,
        /// What went wrong
        message: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
