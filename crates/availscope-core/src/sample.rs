//! Metric samples and series normalization.
//!
//! Raw samples arrive from a source adapter in chunk order, possibly
//! unsorted and possibly with the same timestamp twice where two chunk edges
//! touched. [`normalize`] turns them into a [`SampleSeries`]: sorted ascending
//! with strictly increasing timestamps. It never resamples or fills gaps;
//! missing buckets are the classifier's business.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregation statistic a sample was computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Average,
    Sum,
    Count,
}

impl Statistic {
    /// Name the upstream metric API uses for this statistic.
    pub fn api_name(&self) -> &'static str {
        match self {
            Self::Average => "Average",
            Self::Sum => "Sum",
            Self::Count => "SampleCount",
        }
    }
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Average => write!(f, "average"),
            Self::Sum => write!(f, "sum"),
            Self::Count => write!(f, "count"),
        }
    }
}

impl std::str::FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "average" | "avg" => Ok(Self::Average),
            "sum" => Ok(Self::Sum),
            "count" | "samplecount" => Ok(Self::Count),
            other => Err(format!("unknown statistic '{other}'")),
        }
    }
}

/// One periodic metric observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub statistic: Statistic,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64, statistic: Statistic) -> Self {
        Self {
            timestamp,
            value,
            statistic,
        }
    }
}

/// Time-sorted samples with strictly increasing timestamps.
///
/// Only [`normalize`] builds one, so the ordering invariant always holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleSeries {
    samples: Vec<Sample>,
}

impl SampleSeries {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn into_vec(self) -> Vec<Sample> {
        self.samples
    }
}

impl<'a> IntoIterator for &'a SampleSeries {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Sort by timestamp and collapse duplicate timestamps.
///
/// The sort is stable, so among samples sharing a timestamp the one that
/// arrived first (earliest chunk) is kept and later copies are dropped.
pub fn normalize<I>(raw: I) -> SampleSeries
where
    I: IntoIterator<Item = Sample>,
{
    let mut samples: Vec<Sample> = raw.into_iter().collect();
    samples.sort_by_key(|s| s.timestamp);
    samples.dedup_by(|later, earlier| later.timestamp == earlier.timestamp);
    SampleSeries { samples }
}
