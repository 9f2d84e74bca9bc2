//! Engine entry points.
//!
//! An [`Engine`] owns the injected sources, the configuration, the event
//! sink and a cancellation token. Every call is otherwise stateless: nothing
//! computed for one resource is kept for the next.
//!
//! ```no_run
//! use std::sync::Arc;
//! use availscope_core::{Engine, EngineConfig, MetricProfile, ResourceId, TimeWindow};
//! # fn demo(source: Arc<dyn availscope_core::MetricSource>) -> availscope_core::Result<()> {
//! let engine = Engine::new(EngineConfig::default()).with_metric_source(source);
//! let window = TimeWindow::last_days(chrono::Utc::now(), 30)?;
//! let orders = ResourceId::new("orders")
//!     .with_dimension("ClusterName", "prod")
//!     .with_dimension("ServiceName", "orders-service");
//! let profile = MetricProfile::ecs_running_tasks();
//! let down = engine.compute_metric_downtime(&orders, &profile, &window)?;
//! println!("{:.1} minutes down", down.result.total_down_minutes);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use crate::aggregate::{
    self, FleetReport, MethodUsed, ReliabilityReport, ReportStatus, ResourceOutcome,
};
use crate::cancel::CancellationToken;
use crate::classify::{DowntimeResult, classify};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result, SourceError};
use crate::fetch::{ChunkedRangeFetcher, FetchRequest};
use crate::lifecycle::{LifecycleEvent, Reconstruction, reconstruct_downtime};
use crate::profile::MetricProfile;
use crate::sample::{SampleSeries, normalize};
use crate::sink::{EventSink, LogSink, PipelineEvent};
use crate::source::{EventQuery, EventSource, MetricSource, ResourceId};
use crate::window::{BucketSpec, TimeWindow};

// ---------------------------------------------------------------------------
// Results and jobs
// ---------------------------------------------------------------------------

/// Metric-path result for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDowntime {
    pub result: DowntimeResult,
    /// The normalized series the result was computed from.
    pub series: SampleSeries,
    pub bucket: BucketSpec,
    pub chunks: usize,
    pub skipped_chunks: usize,
    pub partial: bool,
}

impl MetricDowntime {
    /// Why the figure should not be taken at face value. Empty when the
    /// input was complete.
    pub fn degraded_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.skipped_chunks > 0 {
            reasons.push(format!(
                "{} of {} chunks skipped",
                self.skipped_chunks, self.chunks
            ));
        }
        if self.partial {
            reasons.push("fetch cancelled, series is partial".to_string());
        }
        if self.result.fully_missing {
            reasons.push("no samples in window".to_string());
        }
        reasons
    }
}

/// How to compute one resource's downtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Metric(MetricProfile),
    Events,
    /// Replay lifecycle events; fall back to the metric profile when the log
    /// has none.
    EventsOrMetric(MetricProfile),
}

/// One unit of work for [`Engine::run_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceJob {
    pub resource: ResourceId,
    pub method: Method,
}

impl ResourceJob {
    pub fn metric(resource: ResourceId, profile: MetricProfile) -> Self {
        Self {
            resource,
            method: Method::Metric(profile),
        }
    }

    pub fn events(resource: ResourceId) -> Self {
        Self {
            resource,
            method: Method::Events,
        }
    }

    pub fn events_or_metric(resource: ResourceId, profile: MetricProfile) -> Self {
        Self {
            resource,
            method: Method::EventsOrMetric(profile),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Availability reconstruction engine.
pub struct Engine {
    metrics: Option<Arc<dyn MetricSource>>,
    events: Option<Arc<dyn EventSource>>,
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl Engine {
    /// Engine with no sources, logging through [`LogSink`].
    pub fn new(config: EngineConfig) -> Self {
        Self {
            metrics: None,
            events: None,
            config,
            sink: Arc::new(LogSink),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_metric_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.metrics = Some(source);
        self
    }

    pub fn with_event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.events = Some(source);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Share an externally owned token (e.g. one raised by a signal handler).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetch, normalize and classify one metric series.
    ///
    /// The chunk span is the smaller of the profile's and the config's.
    /// Skipped chunks and cancellation do not fail the call; they show up in
    /// the returned counters. An empty series is charged as fully down unless
    /// the policy disables that, in which case this fails with
    /// [`EngineError::NoData`].
    pub fn compute_metric_downtime(
        &self,
        resource: &ResourceId,
        profile: &MetricProfile,
        window: &TimeWindow,
    ) -> Result<MetricDowntime> {
        self.config.validate()?;
        let source = self.metrics.as_ref().ok_or_else(|| {
            EngineError::Source(SourceError::Unavailable(
                "no metric source configured".into(),
            ))
        })?;
        let bucket = BucketSpec::for_window_secs(window, profile.period_secs)?;
        let span = profile.max_chunk_span()?.min(self.config.max_chunk_span()?);
        let fetcher = ChunkedRangeFetcher::new(span)?
            .with_concurrency(self.config.chunk_concurrency)
            .with_timeout(self.config.query_timeout());
        let request = FetchRequest {
            resource: resource.clone(),
            metric: profile.metric.clone(),
            period_secs: profile.period_secs,
            statistic: profile.statistic,
        };

        let outcome = fetcher.fetch(&request, window, source, &self.cancel, self.sink.as_ref())?;
        let series = normalize(outcome.samples);
        let policy = &self.config.policy;
        let result = classify(&series, window, &bucket, &profile.rule, policy);

        if result.fully_missing {
            if !policy.empty_series_is_down {
                return Err(EngineError::NoData {
                    resource: resource.name.clone(),
                });
            }
            self.sink.emit(&PipelineEvent::SeriesMissing {
                resource: resource.name.clone(),
                charged_minutes: result.total_down_minutes,
            });
        }
        if result.clamped {
            let gap_buckets = if policy.charge_gaps || result.fully_missing {
                result.missing_samples()
            } else {
                0
            };
            let raw_buckets = result.down_samples as u64 + gap_buckets;
            self.sink.emit(&PipelineEvent::DowntimeClamped {
                resource: resource.name.clone(),
                raw_minutes: raw_buckets as f64 * bucket.period_minutes(),
                window_minutes: window.total_minutes(),
            });
        }

        Ok(MetricDowntime {
            result,
            series,
            bucket,
            chunks: outcome.chunks,
            skipped_chunks: outcome.skipped_chunks,
            partial: outcome.partial,
        })
    }

    /// Replay the resource's lifecycle events over `window`.
    ///
    /// Fails with [`EngineError::NoEvents`] when the log is empty; callers
    /// should then use [`compute_metric_downtime`](Self::compute_metric_downtime).
    /// A failed or timed-out event query fails the call.
    pub fn compute_event_downtime(
        &self,
        resource: &ResourceId,
        window: &TimeWindow,
    ) -> Result<Reconstruction> {
        let source = self.events.as_ref().ok_or_else(|| {
            EngineError::Source(SourceError::Unavailable(
                "no event source configured".into(),
            ))
        })?;
        let query = EventQuery {
            resource: resource.clone(),
            window: *window,
            timeout: self.config.query_timeout(),
        };
        let events = query_events(source, query)?;
        let reconstruction = reconstruct_downtime(
            &resource.name,
            &events,
            window,
            self.config.initial_state,
            self.config.terminate,
        )?;
        self.sink.emit(&PipelineEvent::EventsReplayed {
            resource: resource.name.clone(),
            events: reconstruction.events,
            stopped_intervals: reconstruction.intervals.len(),
            down_seconds: reconstruction.total_down_seconds(),
        });
        Ok(reconstruction)
    }

    /// Uptime reports for already computed downtime figures.
    pub fn aggregate_reliability(
        &self,
        per_resource: &BTreeMap<String, f64>,
        window: &TimeWindow,
    ) -> Result<BTreeMap<String, ReliabilityReport>> {
        aggregate::aggregate(per_resource, window)
    }

    /// Compute every job over `window`, up to `resource_concurrency` at once.
    ///
    /// A failure is confined to its own resource, which is reported as
    /// unavailable; that includes a resource whose computation panics. Jobs
    /// not started before cancellation are reported as unavailable too, and
    /// the report is marked partial.
    pub fn run_batch(&self, jobs: &[ResourceJob], window: &TimeWindow) -> Result<FleetReport> {
        self.config.validate()?;
        let workers = self.config.resource_concurrency.clamp(1, jobs.len().max(1));
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<ResourceOutcome>>> = Mutex::new(vec![None; jobs.len()]);

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(job) = jobs.get(index) else {
                            break;
                        };
                        let outcome = match std::panic::catch_unwind(
                            std::panic::AssertUnwindSafe(|| self.run_job(job, window)),
                        ) {
                            Ok(outcome) => outcome,
                            Err(_) => self.failed(&job.resource.name, EngineError::Panicked),
                        };
                        slots.lock().unwrap_or_else(PoisonError::into_inner)[index] =
                            Some(outcome);
                    }
                });
            }
        });

        // Every index below `jobs.len()` is claimed by exactly one worker.
        let outcomes = slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .flatten()
            .collect();
        FleetReport::from_outcomes(*window, outcomes, self.cancel.is_cancelled())
    }

    fn run_job(&self, job: &ResourceJob, window: &TimeWindow) -> ResourceOutcome {
        let name = &job.resource.name;
        if self.cancel.is_cancelled() {
            return ResourceOutcome::Unavailable {
                resource_id: name.clone(),
                code: "cancelled",
                reason: "cancelled before start".into(),
            };
        }

        match self.downtime_for(job, window) {
            Ok((minutes, method, reasons)) => {
                self.sink.emit(&PipelineEvent::ResourceCompleted {
                    resource: name.clone(),
                    downtime_minutes: minutes,
                });
                let status = ReportStatus::from_reasons(reasons);
                match aggregate::report_for(name, minutes, window, status) {
                    Ok(report) => ResourceOutcome::Reported { report, method },
                    Err(e) => self.failed(name, e),
                }
            }
            Err(e) => self.failed(name, e),
        }
    }

    fn failed(&self, resource: &str, error: EngineError) -> ResourceOutcome {
        let outcome = ResourceOutcome::failed(resource, &error);
        self.sink.emit(&PipelineEvent::ResourceFailed {
            resource: resource.to_string(),
            error,
        });
        outcome
    }

    fn downtime_for(
        &self,
        job: &ResourceJob,
        window: &TimeWindow,
    ) -> Result<(f64, MethodUsed, Vec<String>)> {
        match &job.method {
            Method::Metric(profile) => {
                self.metric_minutes(job, profile, window, MethodUsed::Metric)
            }
            Method::Events => {
                let r = self.compute_event_downtime(&job.resource, window)?;
                Ok((r.total_down_minutes(), MethodUsed::Events, Vec::new()))
            }
            Method::EventsOrMetric(profile) => {
                match self.compute_event_downtime(&job.resource, window) {
                    Ok(r) => Ok((r.total_down_minutes(), MethodUsed::Events, Vec::new())),
                    Err(e) if e.is_fallback_signal() => {
                        self.sink.emit(&PipelineEvent::FallbackToMetric {
                            resource: job.resource.name.clone(),
                        });
                        self.metric_minutes(job, profile, window, MethodUsed::MetricFallback)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn metric_minutes(
        &self,
        job: &ResourceJob,
        profile: &MetricProfile,
        window: &TimeWindow,
        method: MethodUsed,
    ) -> Result<(f64, MethodUsed, Vec<String>)> {
        let down = self.compute_metric_downtime(&job.resource, profile, window)?;
        Ok((down.result.total_down_minutes, method, down.degraded_reasons()))
    }
}

/// Run one event query on its own thread, giving up after `query.timeout`
/// (zero waits indefinitely).
fn query_events(
    source: &Arc<dyn EventSource>,
    query: EventQuery,
) -> std::result::Result<Vec<LifecycleEvent>, SourceError> {
    let timeout = query.timeout;
    let (tx, rx) = mpsc::channel();
    let source = Arc::clone(source);
    std::thread::spawn(move || {
        let _ = tx.send(source.query(&query));
    });
    let received = if timeout == Duration::ZERO {
        rx.recv().ok()
    } else {
        rx.recv_timeout(timeout).ok()
    };
    received.unwrap_or(Err(SourceError::Timeout(timeout.as_secs_f64())))
}
