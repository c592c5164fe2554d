//! Stitching parameters
//!
//! One immutable [`StitchParams`] value drives an entire run. Every field
//! participates in the result-cache fingerprint, so two runs with any
//! differing field never share a cache entry.

use crate::error::ParameterError;
use serde::{Deserialize, Serialize};

/// Thresholds and toggles controlling one stitching run
///
/// Defaults match the operational values used with a regional mapping
/// network. Distances are meters, speeds meters per second, times seconds.
///
/// # Example
///
/// ```rust
/// use stormstitch::params::StitchParams;
///
/// let params = StitchParams {
///     min_lightning_points: 50,
///     ..StitchParams::default()
/// };
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchParams {
    /// Maximum 3D distance between a point and a strike member, meters
    pub max_lightning_dist: f64,

    /// Upper bound on the inferred propagation speed, m/s
    pub max_lightning_speed: f64,

    /// Lower bound on the inferred propagation speed, m/s
    pub min_lightning_speed: f64,

    /// Minimum member count for a strike to be retained
    pub min_lightning_points: usize,

    /// Maximum gap between a point and the newest strike member, seconds
    pub max_lightning_time_threshold: f64,

    /// Maximum strike duration before forced closure, seconds
    pub max_lightning_duration: f64,

    /// Whether the combiner pass runs at all
    pub combine_strikes_with_intercepting_times: bool,

    /// Interval extension applied to both ends before the overlap test, seconds
    pub intercepting_times_extension_buffer: f64,

    /// Start-point proximity required for an interval merge, meters
    pub intercepting_times_extension_max_distance: f64,
}

impl Default for StitchParams {
    fn default() -> Self {
        Self {
            max_lightning_dist: 50_000.0,
            max_lightning_speed: 299_792.458,
            min_lightning_speed: 0.0,
            min_lightning_points: 300,
            max_lightning_time_threshold: 1.0,
            max_lightning_duration: 20.0,
            combine_strikes_with_intercepting_times: true,
            intercepting_times_extension_buffer: 10.0,
            intercepting_times_extension_max_distance: 15_000.0,
        }
    }
}

impl StitchParams {
    /// Validate field ranges and orderings
    ///
    /// Checked once before any computation so that a bad configuration
    /// fails fast instead of producing an empty or truncated result.
    pub fn validate(&self) -> Result<(), ParameterError> {
        require_positive("max_lightning_dist", self.max_lightning_dist)?;
        require_positive("max_lightning_speed", self.max_lightning_speed)?;
        require_non_negative("min_lightning_speed", self.min_lightning_speed)?;
        require_positive("max_lightning_time_threshold", self.max_lightning_time_threshold)?;
        require_positive("max_lightning_duration", self.max_lightning_duration)?;
        require_non_negative(
            "intercepting_times_extension_buffer",
            self.intercepting_times_extension_buffer,
        )?;
        require_positive(
            "intercepting_times_extension_max_distance",
            self.intercepting_times_extension_max_distance,
        )?;

        if self.min_lightning_speed > self.max_lightning_speed {
            return Err(ParameterError::SpeedOrdering {
                min: self.min_lightning_speed,
                max: self.max_lightning_speed,
            });
        }
        if self.min_lightning_points == 0 {
            return Err(ParameterError::ZeroMinPoints);
        }
        Ok(())
    }

    /// Squared distance threshold, square meters
    #[inline]
    pub fn max_dist_sq(&self) -> f64 {
        self.max_lightning_dist * self.max_lightning_dist
    }

    /// Squared combiner proximity threshold, square meters
    #[inline]
    pub fn intercept_dist_sq(&self) -> f64 {
        self.intercepting_times_extension_max_distance
            * self.intercepting_times_extension_max_distance
    }

    /// Squared speed bounds, (m/s)^2
    #[inline]
    pub fn speed_bounds_sq(&self) -> (f64, f64) {
        (
            self.min_lightning_speed * self.min_lightning_speed,
            self.max_lightning_speed * self.max_lightning_speed,
        )
    }

    /// Canonical token stream used for result-cache fingerprinting
    ///
    /// Floats are encoded by their exact bit patterns, so values that
    /// differ below the printed precision still fingerprint apart.
    pub fn canonical(&self) -> String {
        format!(
            "dist={:016x};vmax={:016x};vmin={:016x};npts={};tthr={:016x};dur={:016x};comb={};buf={:016x};icpt={:016x}",
            self.max_lightning_dist.to_bits(),
            self.max_lightning_speed.to_bits(),
            self.min_lightning_speed.to_bits(),
            self.min_lightning_points,
            self.max_lightning_time_threshold.to_bits(),
            self.max_lightning_duration.to_bits(),
            self.combine_strikes_with_intercepting_times,
            self.intercepting_times_extension_buffer.to_bits(),
            self.intercepting_times_extension_max_distance.to_bits(),
        )
    }
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ParameterError> {
    if !value.is_finite() {
        return Err(ParameterError::NonFinite { field });
    }
    if value <= 0.0 {
        return Err(ParameterError::NonPositive { field, value });
    }
    Ok(())
}

fn require_non_negative(field: &'static str, value: f64) -> Result<(), ParameterError> {
    if !value.is_finite() {
        return Err(ParameterError::NonFinite { field });
    }
    if value < 0.0 {
        return Err(ParameterError::Negative { field, value });
    }
    Ok(())
}
