pub mod batch;
pub mod events;
pub mod metric;
pub mod profiles;

use std::path::Path;
use std::time::Duration;

use availscope_core::{CancellationToken, MetricProfile, TimeWindow, presets};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Reporting window used when none is given (the last 30 days).
pub const DEFAULT_DAYS: i64 = 30;

/// Print an error and exit with status 1.
pub fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}

/// Parse a duration with an `ms`, `s`, `m`, `h` or `d` suffix. A bare number
/// is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else if let Some(rest) = s.strip_suffix('d') {
        (rest, 86_400_000)
    } else {
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    value
        .checked_mul(multiplier)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration out of range: {s}"))
}

/// `--timeout` in milliseconds, so that sub-second values survive. Zero
/// means no timeout.
pub fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// `--chunk` in whole seconds. Spans under one second are rejected.
pub fn chunk_secs(chunk: Duration) -> Result<i64, String> {
    match chunk.as_secs() {
        0 => Err(format!("--chunk must be at least 1s, got {}ms", chunk.as_millis())),
        secs => Ok(i64::try_from(secs).unwrap_or(i64::MAX)),
    }
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{s}': {e}"))
}

/// Resolve `--days` / `--start` / `--end` into a window.
///
/// `end` defaults to `now`. `start` defaults to `days` (or 30) days before
/// `end`. Giving both `--start` and `--days` is an error.
pub fn resolve_window(
    days: Option<i64>,
    start: Option<&str>,
    end: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TimeWindow, String> {
    let end = end.map(parse_timestamp).transpose()?.unwrap_or(now);
    let window = match (start, days) {
        (Some(_), Some(_)) => return Err("use either --start or --days, not both".into()),
        (Some(s), None) => TimeWindow::new(parse_timestamp(s)?, end),
        (None, days) => {
            let days = days.unwrap_or(DEFAULT_DAYS);
            if days <= 0 {
                return Err(format!("--days must be positive, got {days}"));
            }
            TimeWindow::last_days(end, days)
        }
    };
    window.map_err(|e| e.to_string())
}

/// Look up a preset profile, listing the valid names on failure.
pub fn resolve_profile(name: &str) -> Result<MetricProfile, String> {
    MetricProfile::by_name(name).ok_or_else(|| {
        let names: Vec<String> = presets().into_iter().map(|p| p.name).collect();
        format!("unknown profile '{name}' (expected one of: {})", names.join(", "))
    })
}

/// Raise `token` on Ctrl+C.
pub fn cancel_on_interrupt(token: &CancellationToken) {
    let token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, finishing with partial results...");
        token.cancel();
    }) {
        log::warn!("could not install Ctrl+C handler: {e}");
    }
}

/// Write `value` as pretty JSON.
pub fn write_json(path: &str, value: &impl Serialize) {
    let json = match serde_json::to_string_pretty(value) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("\nFailed to serialize results: {e}");
            return;
        }
    };
    match std::fs::write(Path::new(path), json) {
        Ok(()) => println!("\nResults written to {path}"),
        Err(e) => eprintln!("\nFailed to write {path}: {e}"),
    }
}

/// Minutes with hours alongside, e.g. `3200.0 min (53.33 hrs)`.
pub fn fmt_minutes(minutes: f64) -> String {
    format!("{minutes:.1} min ({:.2} hrs)", minutes / 60.0)
}

/// Uptime for display: two decimals.
pub fn fmt_percent(pct: f64) -> String {
    format!("{pct:.2}%")
}
