//! `availscope metric`: downtime for one resource from an exported series.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use availscope_core::{
    DowntimeResult, Engine, EngineConfig, MetricDowntime, MetricProfile, ReportStatus, ResourceId,
    TimeWindow, uptime_percent,
};
use serde::Serialize;

use super::{fail, fmt_minutes, fmt_percent};
use crate::adapters::CloudWatchFileSource;

pub struct MetricCommandConfig<'a> {
    pub resource: &'a str,
    pub dimensions: &'a [String],
    pub data: &'a Path,
    pub profile: MetricProfile,
    pub window: TimeWindow,
    pub engine: EngineConfig,
    pub csv_path: Option<&'a str>,
    pub output_path: Option<&'a str>,
}

#[derive(Serialize)]
struct MetricReport<'a> {
    resource: &'a ResourceId,
    profile: &'a MetricProfile,
    window: TimeWindow,
    downtime: &'a DowntimeResult,
    uptime_percent: f64,
    chunks: usize,
    skipped_chunks: usize,
    partial: bool,
    status: ReportStatus,
}

/// Parse `Name=Value` dimension flags.
pub fn parse_dimensions(resource: &str, raw: &[String]) -> Result<ResourceId, String> {
    raw.iter().try_fold(ResourceId::new(resource), |id, d| {
        d.split_once('=')
            .map(|(k, v)| id.with_dimension(k.trim(), v.trim()))
            .ok_or_else(|| format!("malformed dimension '{d}' (expected Name=Value)"))
    })
}

pub fn run(cfg: MetricCommandConfig<'_>) {
    let resource = parse_dimensions(cfg.resource, cfg.dimensions).unwrap_or_else(|e| fail(e));
    let source = CloudWatchFileSource::new().with_file(cfg.resource, cfg.data);
    let engine = Engine::new(cfg.engine).with_metric_source(Arc::new(source));
    super::cancel_on_interrupt(&engine.cancellation_token());

    let down = engine
        .compute_metric_downtime(&resource, &cfg.profile, &cfg.window)
        .unwrap_or_else(|e| fail(e));
    let uptime = uptime_percent(down.result.total_down_minutes, &cfg.window)
        .unwrap_or_else(|e| fail(e));
    let status = ReportStatus::from_reasons(down.degraded_reasons());

    print_summary(&resource, &cfg.profile, &cfg.window, &down, uptime, &status);

    if let Some(path) = cfg.csv_path {
        match write_csv(Path::new(path), &cfg.profile, &down) {
            Ok(()) => println!("\nSamples written to {path}"),
            Err(e) => eprintln!("\nFailed to write {path}: {e}"),
        }
    }

    if let Some(path) = cfg.output_path {
        super::write_json(
            path,
            &MetricReport {
                resource: &resource,
                profile: &cfg.profile,
                window: cfg.window,
                downtime: &down.result,
                uptime_percent: uptime,
                chunks: down.chunks,
                skipped_chunks: down.skipped_chunks,
                partial: down.partial,
                status,
            },
        );
    }
}

fn print_summary(
    resource: &ResourceId,
    profile: &MetricProfile,
    window: &TimeWindow,
    down: &MetricDowntime,
    uptime: f64,
    status: &ReportStatus,
) {
    let r = &down.result;
    println!("Metric downtime report");
    println!("  Resource:  {resource}");
    for d in &resource.dimensions {
        println!("             {} = {}", d.name, d.value);
    }
    println!(
        "  Metric:    {}/{} ({}, {}s, down when {})",
        profile.metric.namespace,
        profile.metric.name,
        profile.statistic.api_name(),
        profile.period_secs,
        profile.rule
    );
    println!("  Window:    {window}");
    println!(
        "  Chunks:    {} queried, {} skipped",
        down.chunks, down.skipped_chunks
    );
    println!();
    println!(
        "  Samples:   {} of {} expected ({} missing, {} down)",
        r.observed_samples,
        r.expected_samples,
        r.missing_samples(),
        r.down_samples
    );
    println!("  Observed:  {}", fmt_minutes(r.observed_down_minutes));
    println!("  Gaps:      {}", fmt_minutes(r.gap_down_minutes));
    println!("  Downtime:  {}", fmt_minutes(r.total_down_minutes));
    println!("  Uptime:    {}", fmt_percent(uptime));

    if r.clamped {
        println!("\n  Note: downtime exceeded the window and was capped at its length.");
    }
    if r.fully_missing {
        println!("  Warning: no samples in the window; charged as 100% down.");
    }
    if down.partial {
        println!("\n  PARTIAL: interrupted before every chunk was fetched.");
    }
    if let ReportStatus::Degraded { reasons } = status {
        println!("  Status:    degraded ({})", reasons.join("; "));
    } else if r.total_down_minutes == 0.0 {
        println!("\n  No downtime detected.");
    }
}

/// One row per normalized sample, with the rule's verdict.
fn write_csv(path: &Path, profile: &MetricProfile, down: &MetricDowntime) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "timestamp,namespace,metric,statistic,value,down")?;
    for s in &down.series {
        writeln!(
            w,
            "{},{},{},{},{},{}",
            s.timestamp.to_rfc3339(),
            profile.metric.namespace,
            profile.metric.name,
            s.statistic.api_name(),
            s.value,
            u8::from(profile.rule.is_down(s))
        )?;
    }
    w.flush()
}
