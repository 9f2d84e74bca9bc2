//! Source capabilities the engine is polymorphic over.
//!
//! The engine never talks to a vendor API. Callers hand it a
//! [`MetricSource`] and/or an [`EventSource`]; adapters own credentials,
//! pagination, caching and rate limiting. Each query carries the timeout the
//! adapter must honor, and the fetcher additionally stops waiting once it
//! elapses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::lifecycle::LifecycleEvent;
use crate::sample::{Sample, Statistic};
use crate::window::TimeWindow;

/// A named dimension narrowing a metric to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

/// Identity of a monitored resource.
///
/// `name` is what reports are keyed by; `dimensions` are what a metric
/// backend needs to locate its series (e.g. `ClusterName` + `ServiceName`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub name: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

impl ResourceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimensions: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Look up a dimension value by name.
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Which metric series to read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricRef {
    pub namespace: String,
    pub name: String,
}

impl MetricRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// One bounded metric query, issued per chunk.
///
/// Owned so it can be moved onto the worker thread that runs it.
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub resource: ResourceId,
    pub metric: MetricRef,
    pub window: TimeWindow,
    pub period_secs: i64,
    pub statistic: Statistic,
    pub timeout: Duration,
}

/// One lifecycle-event query.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub resource: ResourceId,
    pub window: TimeWindow,
    pub timeout: Duration,
}

/// Periodic metric capability (`queryMetric`).
pub trait MetricSource: Send + Sync {
    /// Return the samples for `query.window`, or why they could not be read.
    fn query(&self, query: &MetricQuery) -> Result<Vec<Sample>, SourceError>;

    /// Adapter name for logs.
    fn name(&self) -> &str {
        "metric-source"
    }
}

/// Lifecycle event-log capability (`queryEvents`).
pub trait EventSource: Send + Sync {
    /// Return the events for `query.resource` inside `query.window`, in any order.
    fn query(&self, query: &EventQuery) -> Result<Vec<LifecycleEvent>, SourceError>;

    /// Adapter name for logs.
    fn name(&self) -> &str {
        "event-source"
    }
}
