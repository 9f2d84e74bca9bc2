//! `availscope batch`: a whole fleet from a plan file.

use std::path::Path;
use std::sync::Arc;

use availscope_core::{Engine, FleetReport, ReportStatus, ResourceOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::fail;
use crate::plan::BatchPlan;

pub struct BatchCommandConfig<'a> {
    pub plan_path: &'a str,
    /// Overrides the plan's `resource_concurrency`.
    pub concurrency: Option<usize>,
    pub output_path: Option<&'a str>,
}

#[derive(Serialize)]
struct BatchOutput<'a> {
    run_id: String,
    generated_at: DateTime<Utc>,
    plan: &'a str,
    report: &'a FleetReport,
}

pub fn run(cfg: BatchCommandConfig<'_>) {
    let plan_path = Path::new(cfg.plan_path);
    let base = plan_path.parent().unwrap_or(Path::new("."));
    let now = Utc::now();
    let mut loaded = BatchPlan::from_file(plan_path)
        .and_then(|plan| plan.into_loaded(base, now))
        .unwrap_or_else(|e| fail(e));
    if let Some(n) = cfg.concurrency {
        loaded.engine.resource_concurrency = n.max(1);
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    log::info!(
        "run {run_id}: {} resource(s), {} at a time",
        loaded.jobs.len(),
        loaded.engine.resource_concurrency
    );

    let engine = Engine::new(loaded.engine)
        .with_metric_source(Arc::new(loaded.metrics))
        .with_event_source(Arc::new(loaded.events));
    super::cancel_on_interrupt(&engine.cancellation_token());

    println!(
        "Computing downtime for {} resource(s) over {}\n",
        loaded.jobs.len(),
        loaded.window
    );
    let report = engine
        .run_batch(&loaded.jobs, &loaded.window)
        .unwrap_or_else(|e| fail(e));

    print_report(&report);

    if let Some(path) = cfg.output_path {
        super::write_json(
            path,
            &BatchOutput {
                run_id,
                generated_at: now,
                plan: cfg.plan_path,
                report: &report,
            },
        );
    }
}

fn print_report(report: &FleetReport) {
    println!(
        "  {:<28} {:<18} {:>12} {:>8} {:>9}  Status",
        "Resource", "Method", "Downtime min", "Hours", "Uptime %"
    );
    println!("  {}", "-".repeat(90));
    for outcome in &report.outcomes {
        match outcome {
            ResourceOutcome::Reported { report: r, method } => {
                let status = match &r.status {
                    ReportStatus::Ok => "ok".to_string(),
                    ReportStatus::Degraded { reasons } => {
                        format!("degraded: {}", reasons.join("; "))
                    }
                };
                println!(
                    "  {:<28} {:<18} {:>12.1} {:>8.2} {:>9.3}  {}",
                    r.resource_id,
                    method.to_string(),
                    r.downtime_minutes,
                    r.downtime_hours(),
                    r.uptime_percent,
                    status
                );
            }
            ResourceOutcome::Unavailable {
                resource_id,
                code,
                reason,
            } => {
                println!(
                    "  {:<28} {:<18} {:>12} {:>8} {:>9}  unavailable ({code}): {reason}",
                    resource_id, "-", "-", "-", "-"
                );
            }
        }
    }

    println!();
    println!(
        "  Resources: {} reported, {} degraded, {} unavailable",
        report.reports().count(),
        report.degraded_count(),
        report.unavailable_count()
    );
    println!(
        "  Total downtime: {}",
        super::fmt_minutes(report.total_downtime_minutes())
    );
    match report.fleet_reliability_percent {
        Some(pct) => println!("  DORA reliability: {pct:.5}%"),
        None => println!("  DORA reliability: n/a (no resource could be reported)"),
    }
    if report.partial {
        println!("\n  PARTIAL: the run was interrupted; some resources were not computed.");
    }
}
