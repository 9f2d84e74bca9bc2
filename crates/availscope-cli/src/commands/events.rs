//! `availscope events`: downtime for one instance from CloudTrail logs.

use std::path::PathBuf;
use std::sync::Arc;

use availscope_core::{
    Engine, EngineConfig, MethodUsed, MetricProfile, ResourceId, StoppedInterval, TimeWindow,
    uptime_percent,
};
use serde::Serialize;

use super::{fail, fmt_minutes, fmt_percent};
use crate::adapters::{CloudTrailFileSource, CloudWatchFileSource};

pub struct EventsCommandConfig<'a> {
    pub instance: &'a str,
    pub logs: Vec<PathBuf>,
    pub window: TimeWindow,
    pub engine: EngineConfig,
    /// Metric path used when the logs hold no events for the instance.
    pub fallback: Option<(MetricProfile, PathBuf)>,
    pub output_path: Option<&'a str>,
}

#[derive(Serialize)]
struct EventsReport<'a> {
    instance: &'a str,
    window: TimeWindow,
    method: MethodUsed,
    downtime_minutes: f64,
    uptime_percent: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stopped_intervals: Vec<StoppedInterval>,
    events: usize,
    ignored_events: usize,
}

pub fn run(cfg: EventsCommandConfig<'_>) {
    let resource = ResourceId::new(cfg.instance);
    let trail = CloudTrailFileSource::new(cfg.logs);
    match trail.log_files() {
        Ok(files) => log::info!("{} CloudTrail log file(s) found", files.len()),
        Err(e) => fail(e),
    }

    let mut engine = Engine::new(cfg.engine).with_event_source(Arc::new(trail));
    if let Some((_, data)) = &cfg.fallback {
        let metrics = CloudWatchFileSource::new().with_file(cfg.instance, data.clone());
        engine = engine.with_metric_source(Arc::new(metrics));
    }
    super::cancel_on_interrupt(&engine.cancellation_token());

    println!("Event downtime report");
    println!("  Instance:  {}", cfg.instance);
    println!("  Window:    {}", cfg.window);

    let report = match engine.compute_event_downtime(&resource, &cfg.window) {
        Ok(rec) => {
            println!("  Events:    {} ({} ignored)", rec.events, rec.ignored);
            print_intervals(&rec.intervals, &cfg.window);
            EventsReport {
                instance: cfg.instance,
                window: cfg.window,
                method: MethodUsed::Events,
                downtime_minutes: rec.total_down_minutes(),
                uptime_percent: 0.0,
                stopped_intervals: rec.intervals,
                events: rec.events,
                ignored_events: rec.ignored,
            }
        }
        Err(e) if e.is_fallback_signal() => {
            let Some((profile, _)) = &cfg.fallback else {
                fail(format!("{e} (pass --fallback-profile and --fallback-data)"))
            };
            println!("  Events:    none, falling back to {}", profile.name);
            let down = engine
                .compute_metric_downtime(&resource, profile, &cfg.window)
                .unwrap_or_else(|e| fail(e));
            for reason in down.degraded_reasons() {
                println!("  Degraded:  {reason}");
            }
            EventsReport {
                instance: cfg.instance,
                window: cfg.window,
                method: MethodUsed::MetricFallback,
                downtime_minutes: down.result.total_down_minutes,
                uptime_percent: 0.0,
                stopped_intervals: Vec::new(),
                events: 0,
                ignored_events: 0,
            }
        }
        Err(e) => fail(e),
    };

    let uptime = uptime_percent(report.downtime_minutes, &cfg.window).unwrap_or_else(|e| fail(e));
    println!();
    println!("  Method:    {}", report.method);
    println!("  Downtime:  {}", fmt_minutes(report.downtime_minutes));
    println!("  Uptime:    {}", fmt_percent(uptime));

    if let Some(path) = cfg.output_path {
        super::write_json(
            path,
            &EventsReport {
                uptime_percent: uptime,
                ..report
            },
        );
    }
}

fn print_intervals(intervals: &[StoppedInterval], window: &TimeWindow) {
    if intervals.is_empty() {
        println!("\n  No stopped periods in the window.");
        return;
    }
    println!("\n  {:<27} {:<27} {:>10}", "Stopped", "Started", "Minutes");
    for iv in intervals {
        let to = iv
            .to
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "(still stopped)".into());
        let minutes = iv.duration(window).num_seconds() as f64 / 60.0;
        println!("  {:<27} {:<27} {:>10.1}", iv.from.to_rfc3339(), to, minutes);
    }
}
