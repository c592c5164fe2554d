//! Core data types used throughout the stitching engine
//!
//! This module defines the fundamental data structures used across the system:
//!
//! # Key Types
//!
//! - **`Point`**: A single raw detection from the mapping network
//! - **`RecordId`**: Stable identifier of a record inside a point store
//! - **`PointId`**: Dense index of a point inside one filtered selection
//! - **`TrackPoint`**: A point projected into local planar coordinates
//! - **`TimeWindow`**: Time interval in unix seconds (inclusive bounds)
//! - **`BoundingBox`**: Geographic extent of a strike
//! - **`Strike`**: One stitched lightning event
//! - **`StrikeSet`**: Finalized output of a stitching run
//!
//! # Example
//!
//! ```rust
//! use stormstitch::types::{Point, TimeWindow};
//!
//! let point = Point::new(1_700_000_000.25, 33.5, -101.8, 7_500.0, 12.4, 0.8, 9);
//!
//! let window = TimeWindow::new(1_700_000_000.0, 1_700_000_020.0).unwrap();
//! assert!(window.contains(point.time_unix));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Stable identifier of a record inside a [`crate::store::PointStore`]
///
/// Record ids are assigned by the store at ingest time and never reused.
/// They survive across selections, which is what makes them suitable for
/// fetching the raw records behind a strike.
pub type RecordId = u64;

/// Dense index of a point inside one filtered selection
///
/// A `PointId` is only meaningful relative to the selection that produced
/// it: id `i` names the `i`-th point of that selection in ascending
/// (`time_unix`, `RecordId`) order. Strikes store these dense ids rather
/// than record ids so that membership lists stay compact and partition
/// arithmetic stays index-based.
pub type PointId = u32;

/// A single raw detection from the lightning-mapping network
///
/// The fundamental input record. Points are immutable once ingested; the
/// stitching core never sees them directly, only their projected
/// [`TrackPoint`] form plus the dense [`PointId`].
///
/// # Fields
///
/// - `time_unix`: detection time in unix seconds (fractional)
/// - `lat`, `lon`: geodetic position in degrees
/// - `alt`: altitude above sea level in meters
/// - `power_db`: received power in dBW
/// - `reduced_chi2`: solution quality metric from the network solver
/// - `num_stations`: number of stations that contributed to the solution
///
/// # Example
///
/// ```rust
/// use stormstitch::types::Point;
///
/// let p = Point::new(1_700_000_000.0, 33.58, -101.87, 8_200.0, 15.1, 0.5, 11);
/// assert_eq!(p.num_stations, 11);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Detection time in unix seconds since epoch (fractional seconds kept)
    pub time_unix: f64,

    /// Geodetic latitude in degrees
    pub lat: f64,

    /// Geodetic longitude in degrees
    pub lon: f64,

    /// Altitude above sea level in meters
    pub alt: f64,

    /// Received power in dBW
    pub power_db: f64,

    /// Reduced chi-squared of the position solution
    pub reduced_chi2: f64,

    /// Number of stations contributing to the solution
    pub num_stations: u32,
}

impl Point {
    /// Create a new point record
    pub fn new(
        time_unix: f64,
        lat: f64,
        lon: f64,
        alt: f64,
        power_db: f64,
        reduced_chi2: f64,
        num_stations: u32,
    ) -> Self {
        Self {
            time_unix,
            lat,
            lon,
            alt,
            power_db,
            reduced_chi2,
            num_stations,
        }
    }
}

/// A point projected into local planar coordinates
///
/// Carries everything the stitching core needs for proximity math: the
/// dense id, the detection time, and Cartesian `(x, y, z)` in meters from
/// the projection anchor. All distance comparisons operate on squared
/// meters computed from these fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Dense id of the point inside the current selection
    pub id: PointId,

    /// Detection time in unix seconds
    pub time_unix: f64,

    /// East offset from the projection anchor in meters
    pub x: f64,

    /// North offset from the projection anchor in meters
    pub y: f64,

    /// Altitude in meters (third Cartesian axis)
    pub z: f64,
}

/// Time interval in unix seconds, inclusive on both ends
///
/// Represents a window [start, end] over the monotonic time axis. Both
/// bounds are inclusive, matching the threshold semantics of the stitching
/// rules.
///
/// # Example
///
/// ```rust
/// use stormstitch::types::TimeWindow;
///
/// let window = TimeWindow::new(10.0, 20.0).unwrap();
///
/// assert!(window.contains(10.0)); // start is inclusive
/// assert!(window.contains(20.0)); // end is inclusive
/// assert!(!window.contains(20.5));
///
/// // Buffered extension for interval-overlap tests
/// let wide = window.extended(5.0);
/// assert!(wide.contains(22.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start time in unix seconds (inclusive)
    pub start: f64,

    /// End time in unix seconds (inclusive)
    pub end: f64,
}

impl TimeWindow {
    /// Create a new time window with validation
    ///
    /// Validates that both bounds are finite and that `start <= end`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stormstitch::types::TimeWindow;
    ///
    /// let window = TimeWindow::new(100.0, 200.0).unwrap();
    /// assert_eq!(window.duration(), 100.0);
    ///
    /// assert!(TimeWindow::new(200.0, 100.0).is_err());
    /// ```
    pub fn new(start: f64, end: f64) -> Result<Self, crate::error::Error> {
        if !start.is_finite() || !end.is_finite() || start > end {
            return Err(crate::error::Error::Configuration(format!(
                "Invalid time window: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Create a new time window without validation
    ///
    /// Only use this when the bounds are already known to be ordered, such
    /// as windows derived from a time-sorted point list.
    pub fn new_unchecked(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Check whether a timestamp falls within this window (inclusive)
    pub fn contains(&self, time_unix: f64) -> bool {
        time_unix >= self.start && time_unix <= self.end
    }

    /// Duration of the window in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// The window extended by `buffer` seconds on both ends
    pub fn extended(&self, buffer: f64) -> Self {
        Self {
            start: self.start - buffer,
            end: self.end + buffer,
        }
    }

    /// Check whether two windows intersect (touching endpoints count)
    pub fn intersects(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// The smallest window covering both inputs
    pub fn union(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Geographic extent of a strike (degrees for lat/lon, meters for alt)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum latitude in degrees
    pub min_lat: f64,
    /// Maximum latitude in degrees
    pub max_lat: f64,
    /// Minimum longitude in degrees
    pub min_lon: f64,
    /// Maximum longitude in degrees
    pub max_lon: f64,
    /// Minimum altitude in meters
    pub min_alt: f64,
    /// Maximum altitude in meters
    pub max_alt: f64,
}

impl BoundingBox {
    /// Degenerate box covering a single point
    pub fn from_point(p: &Point) -> Self {
        Self {
            min_lat: p.lat,
            max_lat: p.lat,
            min_lon: p.lon,
            max_lon: p.lon,
            min_alt: p.alt,
            max_alt: p.alt,
        }
    }

    /// Grow the box to cover an additional point
    pub fn include(&mut self, p: &Point) {
        self.min_lat = self.min_lat.min(p.lat);
        self.max_lat = self.max_lat.max(p.lat);
        self.min_lon = self.min_lon.min(p.lon);
        self.max_lon = self.max_lon.max(p.lon);
        self.min_alt = self.min_alt.min(p.alt);
        self.max_alt = self.max_alt.max(p.alt);
    }

    /// Grow the box to cover another box
    pub fn merge(&mut self, other: &Self) {
        self.min_lat = self.min_lat.min(other.min_lat);
        self.max_lat = self.max_lat.max(other.max_lat);
        self.min_lon = self.min_lon.min(other.min_lon);
        self.max_lon = self.max_lon.max(other.max_lon);
        self.min_alt = self.min_alt.min(other.min_alt);
        self.max_alt = self.max_alt.max(other.max_alt);
    }
}

/// One stitched lightning event
///
/// Built incrementally by the stitching engine and frozen once the run
/// finishes. Membership is time-ascending; the correlation list records,
/// for every appended point, the member it was stitched onto, so callers
/// can reconstruct the propagation structure of the event.
///
/// # Invariants
///
/// - `points` is sorted by (`time_unix`, `PointId`) of the underlying points
/// - `end_time - start_time` never exceeds the configured maximum duration
/// - retained strikes satisfy the configured minimum point count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strike {
    /// Member points as dense ids into the filtered selection, time-ascending
    pub points: Vec<PointId>,

    /// Time of the earliest member in unix seconds
    pub start_time: f64,

    /// Time of the latest member in unix seconds
    pub end_time: f64,

    /// Geographic extent of the members
    pub bounding_box: BoundingBox,

    /// Stitch edges as (parent, child) pairs
    ///
    /// The parent is the member the child was temporally nearest to when it
    /// was appended. Points that opened the strike have no edge.
    pub correlations: Vec<(PointId, PointId)>,
}

impl Strike {
    /// Number of member points
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Duration of the strike in seconds
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Time window spanned by the members
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new_unchecked(self.start_time, self.end_time)
    }
}

/// Finalized output of a stitching run
///
/// Serializable as a whole so that cached results round-trip exactly,
/// including point-index lists and bounding attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeSet {
    /// Retained strikes in ascending start-time order
    pub strikes: Vec<Strike>,

    /// When this set was computed (UTC)
    pub computed_at: chrono::DateTime<chrono::Utc>,

    /// Number of points in the filtered selection the run consumed
    pub point_count: usize,
}

impl StrikeSet {
    /// A set with no strikes and no consumed points
    pub fn empty() -> Self {
        Self {
            strikes: Vec::new(),
            computed_at: chrono::Utc::now(),
            point_count: 0,
        }
    }

    /// Number of strikes in the set
    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    /// True when no strike was retained
    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }

    /// Total number of points across all retained strikes
    pub fn stitched_point_count(&self) -> usize {
        self.strikes.iter().map(Strike::point_count).sum()
    }

    /// Export every strike as a CSV file under `dir`
    ///
    /// One file per strike, named from the strike's UTC start time. When
    /// two strikes share a start second the later file gets a numeric
    /// suffix. `points` must be the filtered selection the strikes were
    /// computed from, so that dense ids resolve.
    ///
    /// Returns the paths written, in strike order.
    pub fn export_csv(&self, points: &[Point], dir: &Path) -> crate::error::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let mut used: HashSet<String> = HashSet::new();
        let mut written = Vec::with_capacity(self.strikes.len());

        for strike in &self.strikes {
            let base = strike_file_stem(strike.start_time);
            let mut stem = base.clone();
            let mut suffix = 2u32;
            while !used.insert(stem.clone()) {
                stem = format!("{}_{}", base, suffix);
                suffix += 1;
            }

            let path = dir.join(format!("{}.csv", stem));
            let mut writer = BufWriter::new(File::create(&path)?);
            writeln!(
                writer,
                "time_unix,lat,lon,alt,power_db,reduced_chi2,num_stations"
            )?;
            for &id in &strike.points {
                let p = &points[id as usize];
                writeln!(
                    writer,
                    "{},{},{},{},{},{},{}",
                    p.time_unix, p.lat, p.lon, p.alt, p.power_db, p.reduced_chi2, p.num_stations
                )?;
            }
            writer.flush()?;
            written.push(path);
        }

        Ok(written)
    }
}

fn strike_file_stem(start_time: f64) -> String {
    let secs = start_time.floor() as i64;
    let nanos = ((start_time - secs as f64) * 1e9).clamp(0.0, 999_999_999.0) as u32;
    match chrono::DateTime::from_timestamp(secs, nanos) {
        Some(dt) => {
            let formatted = dt.format("%Y-%m-%d_%H-%M-%S%.3f").to_string();
            formatted.replace('.', "-")
        }
        None => format!("strike_at_{}", start_time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_window() {
        let window = TimeWindow::new(100.0, 200.0).unwrap();
        assert!(window.contains(150.0));
        assert!(window.contains(100.0));
        assert!(window.contains(200.0));
        assert!(!window.contains(99.9));
        assert!(!window.contains(200.1));
        assert_eq!(window.duration(), 100.0);

        assert!(TimeWindow::new(200.0, 100.0).is_err());
        assert!(TimeWindow::new(f64::NAN, 100.0).is_err());
    }

    #[test]
    fn test_time_window_intersects() {
        let a = TimeWindow::new(0.0, 10.0).unwrap();
        let b = TimeWindow::new(10.0, 20.0).unwrap();
        let c = TimeWindow::new(10.5, 20.0).unwrap();

        // Touching endpoints count as intersecting
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));

        // A buffer can bridge the gap
        assert!(a.extended(1.0).intersects(&c));
    }

    #[test]
    fn test_bounding_box_include_and_merge() {
        let p1 = Point::new(0.0, 33.0, -101.0, 5_000.0, 10.0, 1.0, 8);
        let p2 = Point::new(1.0, 34.0, -102.0, 9_000.0, 11.0, 1.2, 7);

        let mut bbox = BoundingBox::from_point(&p1);
        bbox.include(&p2);
        assert_eq!(bbox.min_lat, 33.0);
        assert_eq!(bbox.max_lat, 34.0);
        assert_eq!(bbox.min_lon, -102.0);
        assert_eq!(bbox.max_lon, -101.0);
        assert_eq!(bbox.max_alt, 9_000.0);

        let p3 = Point::new(2.0, 35.0, -100.0, 2_000.0, 9.0, 0.7, 9);
        let other = BoundingBox::from_point(&p3);
        bbox.merge(&other);
        assert_eq!(bbox.max_lat, 35.0);
        assert_eq!(bbox.max_lon, -100.0);
        assert_eq!(bbox.min_alt, 2_000.0);
    }

    #[test]
    fn test_strike_set_serde_round_trip() {
        let strike = Strike {
            points: vec![0, 1, 2],
            start_time: 1_700_000_000.0,
            end_time: 1_700_000_001.5,
            bounding_box: BoundingBox {
                min_lat: 33.0,
                max_lat: 33.5,
                min_lon: -101.5,
                max_lon: -101.0,
                min_alt: 4_000.0,
                max_alt: 11_000.0,
            },
            correlations: vec![(0, 1), (1, 2)],
        };
        let set = StrikeSet {
            strikes: vec![strike],
            computed_at: chrono::Utc::now(),
            point_count: 3,
        };

        let json = serde_json::to_string(&set).unwrap();
        let back: StrikeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
        assert_eq!(back.stitched_point_count(), 3);
    }

    #[test]
    fn test_export_csv_dedup_names() {
        let points = vec![
            Point::new(1_700_000_000.0, 33.0, -101.0, 5_000.0, 10.0, 1.0, 8),
            Point::new(1_700_000_000.5, 33.1, -101.1, 5_500.0, 12.0, 0.9, 9),
        ];
        let make = |ids: Vec<PointId>| Strike {
            points: ids,
            start_time: 1_700_000_000.0,
            end_time: 1_700_000_000.5,
            bounding_box: BoundingBox::from_point(&points[0]),
            correlations: vec![],
        };
        let set = StrikeSet {
            strikes: vec![make(vec![0]), make(vec![1])],
            computed_at: chrono::Utc::now(),
            point_count: 2,
        };

        let dir = tempfile::tempdir().unwrap();
        let paths = set.export_csv(&points, dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);

        let body = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(body.starts_with("time_unix,lat,lon,alt"));
        assert_eq!(body.lines().count(), 2);
    }
}
