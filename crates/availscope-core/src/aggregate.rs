//! Per-resource uptime reports and the fleet-wide reliability figure.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::window::TimeWindow;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Confidence in a reported figure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Ok,
    /// Computed, but from incomplete input (skipped chunks, a cancelled
    /// fetch, or no samples at all).
    Degraded { reasons: Vec<String> },
}

impl ReportStatus {
    pub fn from_reasons(reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            Self::Ok
        } else {
            Self::Degraded { reasons }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Uptime for one resource over the reporting window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilityReport {
    pub resource_id: String,
    pub downtime_minutes: f64,
    /// Unrounded; round only for display.
    pub uptime_percent: f64,
    pub status: ReportStatus,
}

impl ReliabilityReport {
    pub fn downtime_hours(&self) -> f64 {
        self.downtime_minutes / 60.0
    }
}

fn window_minutes_checked(window: &TimeWindow) -> Result<f64> {
    let minutes = window.total_minutes();
    if minutes <= 0.0 {
        return Err(EngineError::InvalidWindow {
            start: window.start(),
            end: window.end(),
        });
    }
    Ok(minutes)
}

/// `100 * (W - d) / W`, with `W` the window length in minutes.
pub fn uptime_percent(downtime_minutes: f64, window: &TimeWindow) -> Result<f64> {
    let w = window_minutes_checked(window)?;
    Ok(100.0 * (w - downtime_minutes) / w)
}

/// One report per resource, keyed and ordered by resource id.
pub fn aggregate(
    per_resource: &BTreeMap<String, f64>,
    window: &TimeWindow,
) -> Result<BTreeMap<String, ReliabilityReport>> {
    let w = window_minutes_checked(window)?;
    Ok(per_resource
        .iter()
        .map(|(id, &down)| {
            let report = ReliabilityReport {
                resource_id: id.clone(),
                downtime_minutes: down,
                uptime_percent: 100.0 * (w - down) / w,
                status: ReportStatus::Ok,
            };
            (id.clone(), report)
        })
        .collect())
}

/// Fleet KPI: `100 * (T - sum(d)) / T` with `T` the window length in
/// seconds.
///
/// Downtime is summed, not averaged: resources are treated as independent,
/// additive contributors. The figure is meaningful for parallel resources,
/// not for a serial chain of dependencies. With many resources it can go
/// negative; it is not clamped.
pub fn fleet_reliability(
    per_resource: &BTreeMap<String, f64>,
    window: &TimeWindow,
) -> Result<f64> {
    fleet_reliability_from(per_resource.values().copied(), window)
}

fn fleet_reliability_from(
    downtime_minutes: impl IntoIterator<Item = f64>,
    window: &TimeWindow,
) -> Result<f64> {
    window_minutes_checked(window)?;
    let total = window.total_seconds();
    let down: f64 = downtime_minutes.into_iter().map(|m| m * 60.0).sum();
    Ok(100.0 * (total - down) / total)
}

// ---------------------------------------------------------------------------
// Batch outcomes
// ---------------------------------------------------------------------------

/// Which path produced a resource's figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodUsed {
    Metric,
    Events,
    /// Event log was empty; the metric path answered instead.
    MetricFallback,
}

impl std::fmt::Display for MethodUsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metric => write!(f, "metric"),
            Self::Events => write!(f, "events"),
            Self::MetricFallback => write!(f, "metric (fallback)"),
        }
    }
}

/// Result of one resource inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResourceOutcome {
    Reported {
        report: ReliabilityReport,
        method: MethodUsed,
    },
    /// The computation failed; the resource is excluded from the fleet KPI.
    Unavailable {
        resource_id: String,
        code: &'static str,
        reason: String,
    },
}

impl ResourceOutcome {
    pub fn failed(resource_id: impl Into<String>, error: &EngineError) -> Self {
        Self::Unavailable {
            resource_id: resource_id.into(),
            code: error.code(),
            reason: error.to_string(),
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            Self::Reported { report, .. } => &report.resource_id,
            Self::Unavailable { resource_id, .. } => resource_id,
        }
    }

    pub fn report(&self) -> Option<&ReliabilityReport> {
        match self {
            Self::Reported { report, .. } => Some(report),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Everything a batch run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetReport {
    pub window: TimeWindow,
    /// In job order.
    pub outcomes: Vec<ResourceOutcome>,
    /// `None` when no resource could be reported.
    pub fleet_reliability_percent: Option<f64>,
    /// The run was cancelled before every resource finished.
    pub partial: bool,
}

impl FleetReport {
    /// Build the report from finished outcomes.
    pub fn from_outcomes(
        window: TimeWindow,
        outcomes: Vec<ResourceOutcome>,
        partial: bool,
    ) -> Result<Self> {
        let reported: Vec<f64> = outcomes
            .iter()
            .filter_map(|o| o.report().map(|r| r.downtime_minutes))
            .collect();
        let fleet_reliability_percent = if reported.is_empty() {
            None
        } else {
            Some(fleet_reliability_from(reported, &window)?)
        };
        Ok(Self {
            window,
            outcomes,
            fleet_reliability_percent,
            partial,
        })
    }

    pub fn reports(&self) -> impl Iterator<Item = &ReliabilityReport> {
        self.outcomes.iter().filter_map(ResourceOutcome::report)
    }

    pub fn unavailable_count(&self) -> usize {
        self.outcomes.len() - self.reports().count()
    }

    pub fn degraded_count(&self) -> usize {
        self.reports().filter(|r| r.status.is_degraded()).count()
    }

    pub fn total_downtime_minutes(&self) -> f64 {
        self.reports().map(|r| r.downtime_minutes).sum()
    }
}

/// Report for a computed downtime figure.
pub(crate) fn report_for(
    resource_id: &str,
    downtime_minutes: f64,
    window: &TimeWindow,
    status: ReportStatus,
) -> Result<ReliabilityReport> {
    Ok(ReliabilityReport {
        resource_id: resource_id.to_string(),
        downtime_minutes,
        uptime_percent: uptime_percent(downtime_minutes, window)?,
        status,
    })
}
