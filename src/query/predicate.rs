//! Filter predicate AST
//!
//! Defines the filter language the engine accepts: a flat list of
//! `(field, operator, value)` predicates, AND-combined, over the seven
//! indexed point fields. Validation happens up front so a malformed
//! filter is rejected before any retrieval work starts.
//!
//! # Example
//!
//! ```rust
//! use stormstitch::query::{FilterField, Predicate};
//! use stormstitch::types::Point;
//!
//! let pred = Predicate::gte(FilterField::NumStations, 7.0);
//! assert!(pred.validate().is_ok());
//!
//! let point = Point::new(0.0, 33.0, -101.0, 5_000.0, 12.0, 0.8, 9);
//! assert!(pred.evaluate(&point));
//! ```

use crate::error::PredicateError;
use crate::types::Point;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Indexed point fields available for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    /// Detection time in unix seconds
    TimeUnix,
    /// Geodetic latitude in degrees
    Lat,
    /// Geodetic longitude in degrees
    Lon,
    /// Altitude in meters
    Alt,
    /// Received power in dBW
    PowerDb,
    /// Reduced chi-squared of the solution
    ReducedChi2,
    /// Number of contributing stations
    NumStations,
}

impl FilterField {
    /// Every filterable field, in column order
    pub const ALL: [FilterField; 7] = [
        FilterField::TimeUnix,
        FilterField::Lat,
        FilterField::Lon,
        FilterField::Alt,
        FilterField::PowerDb,
        FilterField::ReducedChi2,
        FilterField::NumStations,
    ];

    /// Canonical field name
    pub fn name(&self) -> &'static str {
        match self {
            FilterField::TimeUnix => "time_unix",
            FilterField::Lat => "lat",
            FilterField::Lon => "lon",
            FilterField::Alt => "alt",
            FilterField::PowerDb => "power_db",
            FilterField::ReducedChi2 => "reduced_chi2",
            FilterField::NumStations => "num_stations",
        }
    }

    /// Parse a field from its canonical name
    pub fn parse(name: &str) -> Result<Self, PredicateError> {
        FilterField::ALL
            .iter()
            .copied()
            .find(|f| f.name() == name)
            .ok_or_else(|| PredicateError::UnknownField(name.to_string()))
    }

    /// Extract this field's value from a point
    #[inline]
    pub fn extract(&self, p: &Point) -> f64 {
        match self {
            FilterField::TimeUnix => p.time_unix,
            FilterField::Lat => p.lat,
            FilterField::Lon => p.lon,
            FilterField::Alt => p.alt,
            FilterField::PowerDb => p.power_db,
            FilterField::ReducedChi2 => p.reduced_chi2,
            FilterField::NumStations => p.num_stations as f64,
        }
    }

    /// True for integer-valued fields where equality is meaningful
    pub fn is_discrete(&self) -> bool {
        matches!(self, FilterField::NumStations)
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Predicate comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Equal (discrete fields only)
    Eq,
}

impl FilterOp {
    /// Canonical operator token
    pub fn name(&self) -> &'static str {
        match self {
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Eq => "==",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One filter clause over an indexed point field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Field the predicate targets
    pub field: FilterField,
    /// Comparison operator
    pub op: FilterOp,
    /// Value to compare against
    pub value: f64,
}

impl Predicate {
    /// Create a new predicate
    pub fn new(field: FilterField, op: FilterOp, value: f64) -> Self {
        Self { field, op, value }
    }

    /// Create `field >= value`
    pub fn gte(field: FilterField, value: f64) -> Self {
        Self::new(field, FilterOp::Gte, value)
    }

    /// Create `field <= value`
    pub fn lte(field: FilterField, value: f64) -> Self {
        Self::new(field, FilterOp::Lte, value)
    }

    /// Create `field > value`
    pub fn gt(field: FilterField, value: f64) -> Self {
        Self::new(field, FilterOp::Gt, value)
    }

    /// Create `field < value`
    pub fn lt(field: FilterField, value: f64) -> Self {
        Self::new(field, FilterOp::Lt, value)
    }

    /// Create `field == value`
    pub fn eq(field: FilterField, value: f64) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Validate the predicate before it touches the store
    ///
    /// Rejects non-finite comparison values, and equality comparisons on
    /// continuous fields where float equality would silently match
    /// nothing.
    pub fn validate(&self) -> Result<(), PredicateError> {
        if !self.value.is_finite() {
            return Err(PredicateError::NonFiniteValue {
                field: self.field.name().to_string(),
            });
        }
        if self.op == FilterOp::Eq && !self.field.is_discrete() {
            return Err(PredicateError::UnsupportedOperator {
                field: self.field.name().to_string(),
                op: self.op.name().to_string(),
            });
        }
        Ok(())
    }

    /// Evaluate the predicate against a point record
    pub fn evaluate(&self, point: &Point) -> bool {
        let actual = self.field.extract(point);
        match self.op {
            FilterOp::Gte => actual >= self.value,
            FilterOp::Lte => actual <= self.value,
            FilterOp::Gt => actual > self.value,
            FilterOp::Lt => actual < self.value,
            FilterOp::Eq => actual == self.value,
        }
    }

    /// Canonical token used for fingerprinting
    ///
    /// Encodes the exact float bits so that values differing below the
    /// printed precision still produce distinct tokens.
    pub fn canonical(&self) -> String {
        format!(
            "{} {} {:016x}",
            self.field.name(),
            self.op.name(),
            self.value.to_bits()
        )
    }
}
