//! Batch plan files.
//!
//! ```json
//! {
//!   "window": { "days": 30 },
//!   "engine": { "resource_concurrency": 8 },
//!   "resources": [
//!     { "id": "orders", "metric": { "profile": "ecs-running-tasks", "data": "orders.json" } },
//!     { "id": "i-0abc", "events": { "logs": ["trail/"] },
//!       "fallback": { "profile": "ec2-status-check", "data": "i-0abc.json" } }
//!   ]
//! }
//! ```
//!
//! Relative paths are resolved against the plan file's directory.

use std::path::{Path, PathBuf};

use availscope_core::{
    Dimension, EngineConfig, MetricProfile, ResourceId, ResourceJob, TimeWindow,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::adapters::{CloudTrailFileSource, CloudWatchFileSource};
use crate::commands::{DEFAULT_DAYS, resolve_profile};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchPlan {
    #[serde(default)]
    pub window: PlanWindow,
    #[serde(default)]
    pub engine: EngineConfig,
    pub resources: Vec<PlanResource>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PlanWindow {
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Days {
        days: i64,
    },
}

impl Default for PlanWindow {
    fn default() -> Self {
        Self::Days { days: DEFAULT_DAYS }
    }
}

impl PlanWindow {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<TimeWindow, String> {
        match *self {
            Self::Range { start, end } => TimeWindow::new(start, end).map_err(|e| e.to_string()),
            Self::Days { days } if days > 0 => {
                TimeWindow::last_days(now, days).map_err(|e| e.to_string())
            }
            Self::Days { days } => Err(format!("window days must be positive, got {days}")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanResource {
    pub id: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    pub metric: Option<MetricSpec>,
    pub events: Option<EventsSpec>,
    pub fallback: Option<MetricSpec>,
}

#[derive(Debug, Deserialize)]
pub struct MetricSpec {
    pub profile: ProfileSpec,
    pub data: PathBuf,
}

/// A preset name or a full inline profile.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ProfileSpec {
    Named(String),
    Custom(MetricProfile),
}

impl ProfileSpec {
    fn resolve(&self) -> Result<MetricProfile, String> {
        match self {
            Self::Named(name) => resolve_profile(name),
            Self::Custom(profile) => Ok(profile.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsSpec {
    pub logs: Vec<PathBuf>,
}

/// A plan turned into engine inputs.
pub struct LoadedPlan {
    pub window: TimeWindow,
    pub engine: EngineConfig,
    pub jobs: Vec<ResourceJob>,
    pub metrics: CloudWatchFileSource,
    pub events: CloudTrailFileSource,
}

impl BatchPlan {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read plan {}: {e}", path.display()))?;
        serde_json::from_str(&text).map_err(|e| format!("invalid plan {}: {e}", path.display()))
    }

    /// Resolve profiles, paths and the window. `base` is the directory
    /// relative paths are taken from.
    pub fn into_loaded(self, base: &Path, now: DateTime<Utc>) -> Result<LoadedPlan, String> {
        if self.resources.is_empty() {
            return Err("plan lists no resources".into());
        }
        self.engine.validate().map_err(|e| e.to_string())?;
        let window = self.window.resolve(now)?;
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };

        let mut metrics = CloudWatchFileSource::new();
        let mut log_roots: Vec<PathBuf> = Vec::new();
        let mut jobs = Vec::with_capacity(self.resources.len());

        for r in self.resources {
            let mut resource = ResourceId::new(&r.id);
            resource.dimensions = r.dimensions;
            let job = match (r.metric, r.events, r.fallback) {
                (Some(metric), None, None) => {
                    metrics = metrics.with_file(&r.id, resolve(&metric.data));
                    ResourceJob::metric(resource, metric.profile.resolve()?)
                }
                (None, Some(events), fallback) => {
                    for root in events.logs.iter().map(|p| resolve(p.as_path())) {
                        if !log_roots.contains(&root) {
                            log_roots.push(root);
                        }
                    }
                    match fallback {
                        Some(metric) => {
                            metrics = metrics.with_file(&r.id, resolve(&metric.data));
                            ResourceJob::events_or_metric(resource, metric.profile.resolve()?)
                        }
                        None => ResourceJob::events(resource),
                    }
                }
                (Some(_), Some(_), _) => {
                    return Err(format!(
                        "{}: give either `metric` or `events` (with an optional `fallback`)",
                        r.id
                    ));
                }
                (Some(_), None, Some(_)) | (None, None, Some(_)) => {
                    return Err(format!("{}: `fallback` requires `events`", r.id));
                }
                (None, None, None) => {
                    return Err(format!("{}: needs `metric` or `events`", r.id));
                }
            };
            jobs.push(job);
        }

        Ok(LoadedPlan {
            window,
            engine: self.engine,
            jobs,
            metrics,
            events: CloudTrailFileSource::new(log_roots),
        })
    }
}
