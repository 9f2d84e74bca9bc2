//! Integration tests for availscope-core.
//!
//! These tests drive the public API end to end:
//! source → chunked fetch → normalize → classify / replay → aggregate.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use availscope_core::{
    BucketSpec, CancellationToken, ChunkedRangeFetcher, DownRule, DowntimePolicy, Engine,
    EngineConfig, EventQuery, EventSource, FetchRequest, InitialState, LifecycleEvent,
    LifecycleKind, MemorySink, MetricProfile, MetricQuery, MetricRef, MetricSource, NullSink,
    PipelineEvent, ResourceId, ResourceJob, Sample, SourceError, Statistic, TerminateHandling,
    TimeWindow, aggregate, classify, fleet_reliability, normalize, reconstruct_downtime,
};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn day(d: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap() + TimeDelta::days(d)
}

fn month() -> TimeWindow {
    TimeWindow::new(day(0), day(30)).unwrap()
}

/// In-memory metric backend holding one series per resource. Each query
/// returns only the samples inside its window, like a real backend would.
struct SeriesBackend {
    series: BTreeMap<String, Vec<Sample>>,
    fail_windows: Vec<TimeWindow>,
    calls: Mutex<usize>,
}

impl SeriesBackend {
    fn new() -> Self {
        Self {
            series: BTreeMap::new(),
            fail_windows: Vec::new(),
            calls: Mutex::new(0),
        }
    }

    fn with_series(mut self, resource: &str, samples: Vec<Sample>) -> Self {
        self.series.insert(resource.to_string(), samples);
        self
    }

    fn failing_on(mut self, window: TimeWindow) -> Self {
        self.fail_windows.push(window);
        self
    }
}

impl MetricSource for SeriesBackend {
    fn query(&self, q: &MetricQuery) -> Result<Vec<Sample>, SourceError> {
        *self.calls.lock().unwrap() += 1;
        if self.fail_windows.contains(&q.window) {
            return Err(SourceError::Unavailable("503 Service Unavailable".into()));
        }
        Ok(self
            .series
            .get(&q.resource.name)
            .map(|all| {
                all.iter()
                    .filter(|s| q.window.contains(s.timestamp))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

struct EventLog(Vec<LifecycleEvent>);

impl EventSource for EventLog {
    fn query(&self, q: &EventQuery) -> Result<Vec<LifecycleEvent>, SourceError> {
        Ok(self
            .0
            .iter()
            .filter(|e| e.resource_id == q.resource.name && q.window.contains(e.timestamp))
            .cloned()
            .collect())
    }
}

/// One sample per 5-minute bucket across the month.
fn full_series(mut value: impl FnMut(usize) -> f64) -> Vec<Sample> {
    (0..8640)
        .map(|i| {
            Sample::new(
                day(0) + TimeDelta::minutes(5 * i as i64),
                value(i),
                Statistic::Average,
            )
        })
        .collect()
}

fn request(resource: &str) -> FetchRequest {
    FetchRequest {
        resource: ResourceId::new(resource),
        metric: MetricRef::new("ECS/ContainerInsights", "RunningTaskCount"),
        period_secs: 300,
        statistic: Statistic::Average,
    }
}

// ---------------------------------------------------------------------------
// Chunked fetch
// ---------------------------------------------------------------------------

#[test]
fn chunked_fetch_matches_single_query() {
    let mut rng = StdRng::seed_from_u64(7);
    let backend: Arc<dyn MetricSource> = Arc::new(
        SeriesBackend::new().with_series("svc", full_series(|_| rng.random_range(0.0..4.0))),
    );
    let token = CancellationToken::new();
    let whole = ChunkedRangeFetcher::new(TimeDelta::days(31))
        .unwrap()
        .fetch(&request("svc"), &month(), &backend, &token, &NullSink)
        .unwrap();

    for hours in [1, 7, 24, 100, 24 * 5, 24 * 13] {
        let chunked = ChunkedRangeFetcher::new(TimeDelta::hours(hours))
            .unwrap()
            .fetch(&request("svc"), &month(), &backend, &token, &NullSink)
            .unwrap();
        assert_eq!(chunked.skipped_chunks, 0);
        assert_eq!(
            normalize(chunked.samples),
            normalize(whole.samples.clone()),
            "chunk span {hours}h lost or duplicated samples"
        );
    }
}

#[test]
fn second_of_six_chunks_failing_is_skipped() {
    let second = TimeWindow::new(day(5), day(10)).unwrap();
    let backend = Arc::new(
        SeriesBackend::new()
            .with_series("svc", full_series(|_| 1.0))
            .failing_on(second),
    );
    let dyn_backend: Arc<dyn MetricSource> = backend.clone();
    let sink = MemorySink::new();
    let outcome = ChunkedRangeFetcher::new(TimeDelta::days(5))
        .unwrap()
        .fetch(
            &request("svc"),
            &month(),
            &dyn_backend,
            &CancellationToken::new(),
            &sink,
        )
        .unwrap();

    assert_eq!(outcome.chunks, 6);
    assert_eq!(outcome.skipped_chunks, 1);
    assert_eq!(*backend.calls.lock().unwrap(), 6);
    assert!(outcome.samples.iter().all(|s| !second.contains(s.timestamp)));
    assert_eq!(outcome.samples.len(), 8640 - 1440);
    assert_eq!(
        sink.count(|e| matches!(e, PipelineEvent::ChunkSkipped { chunk: 1, .. })),
        1
    );
}

// ---------------------------------------------------------------------------
// Normalize and classify
// ---------------------------------------------------------------------------

#[test]
fn normalize_is_idempotent_on_shuffled_duplicates() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut raw = full_series(|i| (i % 3) as f64);
    raw.extend(raw.clone().into_iter().take(500));
    raw.shuffle(&mut rng);
    let once = normalize(raw);
    assert_eq!(once.len(), 8640);
    assert_eq!(normalize(once.clone().into_vec()), once);
}

#[test]
fn gap_free_series_has_no_gap_term() {
    let window = month();
    let bucket = BucketSpec::for_window_secs(&window, 300).unwrap();
    let series = normalize(full_series(|i| if i % 10 == 0 { 0.0 } else { 2.0 }));
    for rule in [
        DownRule::ZeroIsDown,
        DownRule::NonZeroIsDown,
        DownRule::ThresholdBelow(1.0),
        DownRule::ThresholdAbove(1.0),
    ] {
        let r = classify(&series, &window, &bucket, &rule, &DowntimePolicy::default());
        assert_eq!(r.gap_down_minutes, 0.0, "{rule}");
        assert_eq!(r.total_down_minutes, r.observed_down_minutes, "{rule}");
    }
}

#[test]
fn empty_series_is_whole_window_down() {
    let window = month();
    let bucket = BucketSpec::for_window_secs(&window, 300).unwrap();
    let r = classify(
        &normalize(Vec::new()),
        &window,
        &bucket,
        &DownRule::ZeroIsDown,
        &DowntimePolicy::default(),
    );
    assert_eq!(r.total_down_minutes, window.total_minutes());
    assert!(r.fully_missing);
}

#[test]
fn month_with_640_missing_buckets_charges_3200_minutes() {
    let window = month();
    let bucket = BucketSpec::for_window_secs(&window, 300).unwrap();
    assert_eq!(bucket.expected_count, 8640);

    // Drop 640 buckets scattered across the month.
    let mut rng = StdRng::seed_from_u64(2024);
    let mut samples = full_series(|_| 3.0);
    samples.shuffle(&mut rng);
    samples.truncate(8000);
    let series = normalize(samples);

    let r = classify(
        &series,
        &window,
        &bucket,
        &DownRule::ZeroIsDown,
        &DowntimePolicy::default(),
    );
    assert_eq!(r.observed_down_minutes, 0.0);
    assert_eq!(r.gap_down_minutes, 3200.0);
    assert_eq!(r.total_down_minutes, 3200.0);
    assert_eq!(r.missing_samples(), 640);
}

// ---------------------------------------------------------------------------
// Lifecycle replay
// ---------------------------------------------------------------------------

fn ev(d: i64, kind: LifecycleKind) -> LifecycleEvent {
    LifecycleEvent::new(day(d), kind, "i-0abc")
}

#[test]
fn stop_start_pair_is_exact() {
    let t1 = day(3) + TimeDelta::seconds(17);
    let t2 = day(9) + TimeDelta::milliseconds(250);
    let events = [
        LifecycleEvent::new(t1, LifecycleKind::Stop, "i-0abc"),
        LifecycleEvent::new(t2, LifecycleKind::Start, "i-0abc"),
    ];
    let r = reconstruct_downtime(
        "i-0abc",
        &events,
        &month(),
        InitialState::Running,
        TerminateHandling::default(),
    )
    .unwrap();
    assert_eq!(r.total_down, t2 - t1);
}

#[test]
fn lone_stop_runs_to_window_end() {
    let r = reconstruct_downtime(
        "i-0abc",
        &[ev(21, LifecycleKind::Stop)],
        &month(),
        InitialState::Running,
        TerminateHandling::default(),
    )
    .unwrap();
    assert_eq!(r.total_down, day(30) - day(21));
}

#[test]
fn month_of_lifecycle_events() {
    let events = [
        ev(0, LifecycleKind::Start),
        ev(5, LifecycleKind::Stop),
        ev(7, LifecycleKind::Start),
        ev(20, LifecycleKind::Terminate),
    ];
    let r = reconstruct_downtime(
        "i-0abc",
        &events,
        &month(),
        InitialState::Running,
        TerminateHandling::default(),
    )
    .unwrap();
    assert_eq!(r.total_down, day(7) - day(5));
    assert_eq!(r.total_down_minutes(), 2.0 * 1440.0);
}

#[test]
fn terminate_mid_month_is_ignored_by_default() {
    let events = vec![
        ev(0, LifecycleKind::Start),
        ev(5, LifecycleKind::Terminate),
        ev(10, LifecycleKind::Stop),
        ev(12, LifecycleKind::Start),
    ];
    let engine = Engine::new(EngineConfig::default()).with_event_source(Arc::new(EventLog(events)));
    let r = engine
        .compute_event_downtime(&ResourceId::new("i-0abc"), &month())
        .unwrap();
    assert_eq!(r.total_down_minutes(), 2.0 * 1440.0);
    assert_eq!(r.intervals.len(), 1);

    let as_stop = Engine::new(EngineConfig {
        terminate: TerminateHandling::Stop,
        ..EngineConfig::default()
    })
    .with_event_source(Arc::new(EventLog(vec![
        ev(0, LifecycleKind::Start),
        ev(5, LifecycleKind::Terminate),
        ev(10, LifecycleKind::Stop),
        ev(12, LifecycleKind::Start),
    ])));
    let r = as_stop
        .compute_event_downtime(&ResourceId::new("i-0abc"), &month())
        .unwrap();
    assert_eq!(r.total_down_minutes(), 7.0 * 1440.0);
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[test]
fn uptime_complements_downtime() {
    let window = month();
    let mut rng = StdRng::seed_from_u64(5);
    let per: BTreeMap<String, f64> = (0..50)
        .map(|i| (format!("r{i}"), rng.random_range(0.0..window.total_minutes())))
        .collect();
    for r in aggregate(&per, &window).unwrap().values() {
        let total = r.uptime_percent + r.downtime_minutes / window.total_minutes() * 100.0;
        assert!((total - 100.0).abs() < 1e-9);
    }
}

#[test]
fn fleet_kpi_matches_dora_formula() {
    let window = month();
    let per: BTreeMap<String, f64> =
        [("ec2".to_string(), 45.0), ("ecs".to_string(), 3200.0)].into();
    let total = window.total_seconds();
    let expected = (total - (45.0 + 3200.0) * 60.0) / total * 100.0;
    assert!((fleet_reliability(&per, &window).unwrap() - expected).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Engine batch
// ---------------------------------------------------------------------------

#[test]
fn batch_run_over_mixed_fleet() {
    let mut partial = full_series(|_| 2.0);
    partial.truncate(8000);
    let backend = SeriesBackend::new()
        .with_series("orders", full_series(|_| 2.0))
        .with_series("payments", partial)
        .with_series("i-0abc", full_series(|i| if i < 12 { 1.0 } else { 0.0 }));
    let events = EventLog(vec![
        LifecycleEvent::new(day(5), LifecycleKind::Stop, "i-0def"),
        LifecycleEvent::new(day(7), LifecycleKind::Start, "i-0def"),
    ]);
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(EngineConfig {
        chunk_concurrency: 2,
        ..EngineConfig::default()
    })
    .with_metric_source(Arc::new(backend))
    .with_event_source(Arc::new(events))
    .with_sink(sink.clone());

    let ecs = MetricProfile::ecs_running_tasks();
    let ec2 = MetricProfile::ec2_status_check();
    let jobs = vec![
        ResourceJob::metric(ResourceId::new("orders"), ecs.clone()),
        ResourceJob::metric(ResourceId::new("payments"), ecs.clone()),
        ResourceJob::events_or_metric(ResourceId::new("i-0abc"), ec2.clone()),
        ResourceJob::events_or_metric(ResourceId::new("i-0def"), ec2),
        ResourceJob::events(ResourceId::new("i-0ghi")),
    ];
    let fleet = engine.run_batch(&jobs, &month()).unwrap();

    let down: Vec<Option<f64>> = fleet
        .outcomes
        .iter()
        .map(|o| o.report().map(|r| r.downtime_minutes))
        .collect();
    assert_eq!(
        down,
        vec![Some(0.0), Some(3200.0), Some(60.0), Some(2880.0), None]
    );
    assert_eq!(fleet.unavailable_count(), 1);
    assert_eq!(
        sink.count(|e| matches!(e, PipelineEvent::FallbackToMetric { .. })),
        1
    );

    let total = month().total_seconds();
    let expected = 100.0 * (total - (3200.0 + 60.0 + 2880.0) * 60.0) / total;
    let kpi = fleet.fleet_reliability_percent.unwrap();
    assert!((kpi - expected).abs() < 1e-9);
}

#[test]
fn cancelled_engine_reports_partial_fetch() {
    let token = CancellationToken::new();
    let backend = SeriesBackend::new().with_series("orders", full_series(|_| 1.0));
    let engine = Engine::new(EngineConfig::default())
        .with_metric_source(Arc::new(backend))
        .with_sink(Arc::new(NullSink))
        .with_cancellation(token.clone());
    token.cancel();
    let down = engine
        .compute_metric_downtime(
            &ResourceId::new("orders"),
            &MetricProfile::ecs_running_tasks(),
            &month(),
        )
        .unwrap();
    assert!(down.partial);
    assert!(down.result.fully_missing);
    assert_eq!(down.degraded_reasons().len(), 2);
}

#[test]
fn initially_stopped_policy_through_engine() {
    let events = EventLog(vec![LifecycleEvent::new(
        day(3),
        LifecycleKind::Start,
        "i-0abc",
    )]);
    let engine = Engine::new(EngineConfig {
        initial_state: InitialState::Stopped,
        ..EngineConfig::default()
    })
    .with_event_source(Arc::new(events))
    .with_sink(Arc::new(NullSink));
    let r = engine
        .compute_event_downtime(&ResourceId::new("i-0abc"), &month())
        .unwrap();
    assert_eq!(r.total_down, TimeDelta::days(3));
}
