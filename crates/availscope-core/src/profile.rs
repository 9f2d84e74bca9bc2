//! Metric profiles: which series to read and how to classify it.
//!
//! A profile bundles everything the metric path needs besides the resource
//! and the window. Four presets cover the common AWS health signals; any
//! other series can be described with [`MetricProfile::custom`].

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::classify::DownRule;
use crate::error::{EngineError, Result};
use crate::sample::Statistic;
use crate::source::MetricRef;

const FIVE_DAYS_SECS: i64 = 5 * 86_400;
const ONE_DAY_SECS: i64 = 86_400;

fn default_chunk_span() -> i64 {
    FIVE_DAYS_SECS
}

/// How to read and classify one kind of health metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricProfile {
    pub name: String,
    pub metric: MetricRef,
    pub statistic: Statistic,
    pub period_secs: i64,
    pub rule: DownRule,
    /// Longest span one backend query may cover.
    #[serde(default = "default_chunk_span")]
    pub max_chunk_span_secs: i64,
}

impl MetricProfile {
    /// EC2 instance status checks: any failure in a bucket is downtime.
    pub fn ec2_status_check() -> Self {
        Self {
            name: "ec2-status-check".into(),
            metric: MetricRef::new("AWS/EC2", "StatusCheckFailed"),
            statistic: Statistic::Sum,
            period_secs: 300,
            rule: DownRule::NonZeroIsDown,
            max_chunk_span_secs: FIVE_DAYS_SECS,
        }
    }

    /// ECS service with Container Insights: no running tasks is downtime.
    pub fn ecs_running_tasks() -> Self {
        Self {
            name: "ecs-running-tasks".into(),
            metric: MetricRef::new("ECS/ContainerInsights", "RunningTaskCount"),
            statistic: Statistic::Average,
            period_secs: 300,
            rule: DownRule::ZeroIsDown,
            max_chunk_span_secs: FIVE_DAYS_SECS,
        }
    }

    /// Load balancer target group: no healthy hosts is downtime.
    ///
    /// One-minute resolution, so queries are capped at a day to stay under
    /// the backend's per-call datapoint limit.
    pub fn alb_healthy_hosts() -> Self {
        Self {
            name: "alb-healthy-hosts".into(),
            metric: MetricRef::new("AWS/ApplicationELB", "HealthyHostCount"),
            statistic: Statistic::Average,
            period_secs: 60,
            rule: DownRule::ZeroIsDown,
            max_chunk_span_secs: ONE_DAY_SECS,
        }
    }

    /// Load balancer target group: any unhealthy host is downtime.
    pub fn alb_unhealthy_hosts() -> Self {
        Self {
            name: "alb-unhealthy-hosts".into(),
            metric: MetricRef::new("AWS/ApplicationELB", "UnHealthyHostCount"),
            statistic: Statistic::Average,
            period_secs: 300,
            rule: DownRule::NonZeroIsDown,
            max_chunk_span_secs: FIVE_DAYS_SECS,
        }
    }

    /// A profile for any other series.
    pub fn custom(
        name: impl Into<String>,
        metric: MetricRef,
        statistic: Statistic,
        period_secs: i64,
        rule: DownRule,
    ) -> Self {
        Self {
            name: name.into(),
            metric,
            statistic,
            period_secs,
            rule,
            max_chunk_span_secs: FIVE_DAYS_SECS,
        }
    }

    pub fn with_max_chunk_span_secs(mut self, secs: i64) -> Self {
        self.max_chunk_span_secs = secs;
        self
    }

    /// Sampling period, or [`EngineError::InvalidPeriod`] when it is not
    /// positive or does not fit a [`TimeDelta`].
    pub fn period(&self) -> Result<TimeDelta> {
        TimeDelta::try_seconds(self.period_secs)
            .filter(|p| *p > TimeDelta::zero())
            .ok_or(EngineError::InvalidPeriod)
    }

    pub fn max_chunk_span(&self) -> Result<TimeDelta> {
        TimeDelta::try_seconds(self.max_chunk_span_secs)
            .filter(|s| *s > TimeDelta::zero())
            .ok_or(EngineError::InvalidChunkSpan)
    }

    /// Look up a preset by name.
    pub fn by_name(name: &str) -> Option<Self> {
        presets().into_iter().find(|p| p.name == name)
    }
}

/// All built-in presets.
pub fn presets() -> Vec<MetricProfile> {
    vec![
        MetricProfile::ec2_status_check(),
        MetricProfile::ecs_running_tasks(),
        MetricProfile::alb_healthy_hosts(),
        MetricProfile::alb_unhealthy_hosts(),
    ]
}
