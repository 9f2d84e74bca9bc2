//! Query windows and bucket geometry.
//!
//! A [`TimeWindow`] is half-open, `[start, end)`, and can only be built with
//! `start < end`; every fetch, classification and availability figure is
//! computed against one. A [`BucketSpec`] pairs a sampling period with the
//! number of samples a fully-populated series would hold over a window.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Immutable half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawWindow> for TimeWindow {
    type Error = EngineError;

    fn try_from(raw: RawWindow) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl TimeWindow {
    /// Build a window, rejecting empty or inverted ranges.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(EngineError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window of length `span` that ends at `end`.
    pub fn ending_at(end: DateTime<Utc>, span: TimeDelta) -> Result<Self> {
        let start = end
            .checked_sub_signed(span)
            .ok_or(EngineError::InvalidWindow {
                start: DateTime::<Utc>::MIN_UTC,
                end,
            })?;
        Self::new(start, end)
    }

    /// The trailing `days` days ending at `end`.
    pub fn last_days(end: DateTime<Utc>, days: i64) -> Result<Self> {
        let span = TimeDelta::try_days(days).ok_or(EngineError::InvalidWindow {
            start: DateTime::<Utc>::MIN_UTC,
            end,
        })?;
        Self::ending_at(end, span)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Window length in seconds (millisecond resolution).
    pub fn total_seconds(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 1000.0
    }

    /// Window length in minutes; the denominator for availability math.
    pub fn total_minutes(&self) -> f64 {
        self.total_seconds() / 60.0
    }

    /// Whether `t` falls inside `[start, end)`.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    /// Clamp an instant into `[start, end]`.
    pub fn clamp(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        t.clamp(self.start, self.end)
    }

    /// Split into consecutive sub-windows no longer than `max_span`.
    ///
    /// Sub-windows tile the window exactly: each starts where the previous
    /// ended, and the last one is clipped to `end`.
    pub fn split(&self, max_span: TimeDelta) -> Result<Vec<TimeWindow>> {
        if max_span <= TimeDelta::zero() {
            return Err(EngineError::InvalidChunkSpan);
        }
        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let chunk_end = cursor
                .checked_add_signed(max_span)
                .map_or(self.end, |t| t.min(self.end));
            chunks.push(TimeWindow {
                start: cursor,
                end: chunk_end,
            });
            cursor = chunk_end;
        }
        Ok(chunks)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

/// Sampling geometry for one window: the period of a bucket and how many
/// buckets a gap-free series would contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpec {
    pub period: TimeDelta,
    pub expected_count: u64,
}

impl BucketSpec {
    /// `expected_count = floor(window / period)`.
    pub fn for_window(window: &TimeWindow, period: TimeDelta) -> Result<Self> {
        let period_ms = period.num_milliseconds();
        if period_ms <= 0 {
            return Err(EngineError::InvalidPeriod);
        }
        let window_ms = window.duration().num_milliseconds();
        Ok(Self {
            period,
            expected_count: (window_ms / period_ms) as u64,
        })
    }

    /// Convenience for periods expressed in whole seconds.
    pub fn for_window_secs(window: &TimeWindow, period_secs: i64) -> Result<Self> {
        let period = TimeDelta::try_seconds(period_secs).ok_or(EngineError::InvalidPeriod)?;
        Self::for_window(window, period)
    }

    pub fn period_seconds(&self) -> i64 {
        self.period.num_seconds()
    }

    pub fn period_minutes(&self) -> f64 {
        self.period.num_milliseconds() as f64 / 60_000.0
    }
}
