//! Window specifications and event-time instance assignment.
//!
//! Assignment is pure arithmetic over unix seconds: a tumbling spec maps an
//! event to exactly one instance, a sliding spec to `size / period`
//! overlapping instances. All ranges are half-open `[start, end)`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

/// Errors from window-spec validation; surfaced as configuration failures
/// at startup, never at runtime.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowSpecError {
    #[error("window size must be positive (got {0}s)")]
    NonPositiveSize(i64),
    #[error("sliding period must be positive (got {0}s)")]
    NonPositivePeriod(i64),
    #[error("sliding size {size}s must be an integer multiple of period {period}s")]
    SizeNotMultipleOfPeriod { size: i64, period: i64 },
}

/// A window specification: tumbling (non-overlapping) or sliding
/// (overlapping, advancing by `period_secs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowSpec {
    Tumbling { size_secs: i64 },
    Sliding { size_secs: i64, period_secs: i64 },
}

impl WindowSpec {
    pub fn tumbling(size_secs: i64) -> Self {
        Self::Tumbling { size_secs }
    }

    pub fn sliding(size_secs: i64, period_secs: i64) -> Self {
        Self::Sliding {
            size_secs,
            period_secs,
        }
    }

    /// Window length in seconds.
    pub fn size_secs(&self) -> i64 {
        match *self {
            Self::Tumbling { size_secs } => size_secs,
            Self::Sliding { size_secs, .. } => size_secs,
        }
    }

    /// Advance step in seconds; equals the size for tumbling windows.
    pub fn period_secs(&self) -> i64 {
        match *self {
            Self::Tumbling { size_secs } => size_secs,
            Self::Sliding { period_secs, .. } => period_secs,
        }
    }

    /// Number of instances a single event is assigned to.
    pub fn instances_per_event(&self) -> usize {
        (self.size_secs() / self.period_secs()) as usize
    }

    /// Validate the spec geometry. Checked once at configuration time.
    pub fn validate(&self) -> Result<(), WindowSpecError> {
        let size = self.size_secs();
        if size <= 0 {
            return Err(WindowSpecError::NonPositiveSize(size));
        }
        if let Self::Sliding {
            size_secs,
            period_secs,
        } = *self
        {
            if period_secs <= 0 {
                return Err(WindowSpecError::NonPositivePeriod(period_secs));
            }
            if size_secs % period_secs != 0 {
                return Err(WindowSpecError::SizeNotMultipleOfPeriod {
                    size: size_secs,
                    period: period_secs,
                });
            }
        }
        Ok(())
    }

    /// All instances whose `[start, end)` range contains `t`.
    ///
    /// Starts are multiples of the period (of the size for tumbling), so a
    /// tumbling spec yields one instance and a sliding spec exactly
    /// `size / period`, newest first.
    pub fn assign(&self, t: DateTime<Utc>) -> SmallVec<[WindowRange; 3]> {
        let secs = t.timestamp();
        let period = self.period_secs();
        let size = self.size_secs();
        // div_euclid keeps the floor correct for pre-epoch timestamps.
        let newest_start = secs.div_euclid(period) * period;

        let mut out = SmallVec::new();
        let mut start = newest_start;
        while start + size > secs {
            out.push(WindowRange::from_secs(start, start + size));
            start -= period;
        }
        out
    }
}

/// Half-open event-time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WindowRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Build a range from unix-second bounds.
    ///
    /// Bounds produced by window arithmetic are always representable, so
    /// the fallible chrono conversion does not surface here.
    pub fn from_secs(start_secs: i64, end_secs: i64) -> Self {
        Self {
            start: DateTime::from_timestamp(start_secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: DateTime::from_timestamp(end_secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// The output-grid slot this window's result lands in: the cell of
    /// `period_secs` width ending at this window's end. Identity for a
    /// tumbling window of the same size as the grid.
    pub fn output_slot(&self, period_secs: i64) -> WindowRange {
        WindowRange {
            start: self.end - Duration::seconds(period_secs),
            end: self.end,
        }
    }
}

impl std::fmt::Display for WindowRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%S"),
            self.end.format("%Y-%m-%dT%H:%M:%S")
        )
    }
}
