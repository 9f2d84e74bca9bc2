//! File-backed sources: CloudWatch statistics exports and CloudTrail logs.
//!
//! Both adapters parse lazily on first query and keep the parsed records, so
//! a chunked fetch reads each file once.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use availscope_core::{
    EventQuery, EventSource, LifecycleEvent, LifecycleKind, MetricQuery, MetricSource, Sample,
    SourceError, Statistic,
};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::Deserialize;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read a file, transparently gunzipping it when it starts with the gzip
/// magic bytes.
fn read_maybe_gzipped(path: &Path) -> Result<Vec<u8>, SourceError> {
    let raw = fs::read(path)
        .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?;
    if !raw.starts_with(&GZIP_MAGIC) {
        return Ok(raw);
    }
    let mut out = Vec::new();
    GzDecoder::new(raw.as_slice())
        .read_to_end(&mut out)
        .map_err(|e| SourceError::Malformed(format!("{}: {e}", path.display())))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// CloudWatch GetMetricStatistics exports
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatisticsExport {
    #[serde(default)]
    datapoints: Vec<Datapoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Datapoint {
    timestamp: DateTime<Utc>,
    average: Option<f64>,
    sum: Option<f64>,
    sample_count: Option<f64>,
}

impl Datapoint {
    fn value(&self, statistic: Statistic) -> Option<f64> {
        match statistic {
            Statistic::Average => self.average,
            Statistic::Sum => self.sum,
            Statistic::Count => self.sample_count,
        }
    }
}

/// [`MetricSource`] over `aws cloudwatch get-metric-statistics` output saved
/// to disk, one file per resource.
#[derive(Default)]
pub struct CloudWatchFileSource {
    files: BTreeMap<String, PathBuf>,
    cache: Mutex<HashMap<String, Arc<Vec<Datapoint>>>>,
}

impl CloudWatchFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the export holding `resource`'s series.
    pub fn with_file(mut self, resource: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.insert(resource.into(), path.into());
        self
    }

    fn datapoints(&self, resource: &str) -> Result<Arc<Vec<Datapoint>>, SourceError> {
        if let Some(points) = self.cache.lock().ok().and_then(|c| c.get(resource).cloned()) {
            return Ok(points);
        }
        let path = self.files.get(resource).ok_or_else(|| {
            SourceError::Unavailable(format!("no metric export registered for {resource}"))
        })?;
        let bytes = read_maybe_gzipped(path)?;
        let export: StatisticsExport = serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::Malformed(format!("{}: {e}", path.display())))?;
        log::debug!(
            "{resource}: loaded {} datapoints from {}",
            export.datapoints.len(),
            path.display()
        );
        let points = Arc::new(export.datapoints);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(resource.to_string(), Arc::clone(&points));
        }
        Ok(points)
    }
}

impl MetricSource for CloudWatchFileSource {
    fn query(&self, query: &MetricQuery) -> Result<Vec<Sample>, SourceError> {
        let points = self.datapoints(&query.resource.name)?;
        Ok(points
            .iter()
            .filter(|p| query.window.contains(p.timestamp))
            .filter_map(|p| {
                p.value(query.statistic)
                    .map(|v| Sample::new(p.timestamp, v, query.statistic))
            })
            .collect())
    }

    fn name(&self) -> &str {
        "cloudwatch-file"
    }
}

// ---------------------------------------------------------------------------
// CloudTrail logs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TrailFile {
    #[serde(rename = "Records", default)]
    records: Vec<TrailRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrailRecord {
    event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    event_source: String,
    #[serde(default)]
    event_name: String,
    #[serde(default)]
    resources: Vec<TrailResource>,
    #[serde(default)]
    request_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrailResource {
    resource_name: Option<String>,
}

impl TrailRecord {
    /// Instance ids this record acts on.
    fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .resources
            .iter()
            .filter_map(|r| r.resource_name.clone())
            .collect();
        let items = self
            .request_parameters
            .as_ref()
            .and_then(|p| p.pointer("/instancesSet/items"))
            .and_then(|v| v.as_array());
        let listed = items
            .into_iter()
            .flatten()
            .filter_map(|item| item.get("instanceId").and_then(|v| v.as_str()));
        for id in listed {
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }
}

/// [`EventSource`] over CloudTrail log files (`.json` or `.json.gz`), or
/// directories of them in the S3 delivery layout.
pub struct CloudTrailFileSource {
    roots: Vec<PathBuf>,
    events: Mutex<Option<Arc<Vec<LifecycleEvent>>>>,
}

impl CloudTrailFileSource {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            events: Mutex::new(None),
        }
    }

    /// Every log file under the configured roots, sorted.
    pub fn log_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let mut files = Vec::new();
        for root in &self.roots {
            collect_log_files(root, &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    fn load(&self) -> Result<Arc<Vec<LifecycleEvent>>, SourceError> {
        if let Some(events) = self.events.lock().ok().and_then(|e| e.clone()) {
            return Ok(events);
        }
        let mut events = Vec::new();
        let files = self.log_files()?;
        for path in &files {
            let bytes = read_maybe_gzipped(path)?;
            let trail: TrailFile = serde_json::from_slice(&bytes)
                .map_err(|e| SourceError::Malformed(format!("{}: {e}", path.display())))?;
            events.extend(lifecycle_events(trail.records));
        }
        log::debug!(
            "loaded {} EC2 lifecycle events from {} CloudTrail files",
            events.len(),
            files.len()
        );
        let events = Arc::new(events);
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(Arc::clone(&events));
        }
        Ok(events)
    }
}

fn collect_log_files(path: &Path, out: &mut Vec<PathBuf>) -> Result<(), SourceError> {
    let unavailable =
        |e: std::io::Error| SourceError::Unavailable(format!("{}: {e}", path.display()));
    if path.is_file() {
        out.push(path.to_path_buf());
        return Ok(());
    }
    for entry in fs::read_dir(path).map_err(unavailable)? {
        let entry_path = entry.map_err(unavailable)?.path();
        if entry_path.is_dir() {
            collect_log_files(&entry_path, out)?;
        } else if is_log_file(&entry_path) {
            out.push(entry_path);
        }
    }
    Ok(())
}

fn is_log_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.ends_with(".json") || name.ends_with(".json.gz")
}

/// EC2 start/stop/terminate calls, one event per instance acted on.
fn lifecycle_events(records: Vec<TrailRecord>) -> Vec<LifecycleEvent> {
    let mut out = Vec::new();
    for record in records {
        if record.event_source != "ec2.amazonaws.com" {
            continue;
        }
        let (Some(kind), Some(at)) = (
            LifecycleKind::from_api_call(&record.event_name),
            record.event_time,
        ) else {
            continue;
        };
        for id in record.instance_ids() {
            out.push(LifecycleEvent::new(at, kind, id));
        }
    }
    out
}

impl EventSource for CloudTrailFileSource {
    fn query(&self, query: &EventQuery) -> Result<Vec<LifecycleEvent>, SourceError> {
        let events = self.load()?;
        Ok(events
            .iter()
            .filter(|e| e.resource_id == query.resource.name && query.window.contains(e.timestamp))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "cloudtrail-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use availscope_core::{ResourceId, TimeWindow};
    use chrono::{TimeDelta, TimeZone};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::time::Duration;

    fn day(d: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap() + TimeDelta::days(d)
    }

    fn window(from: i64, to: i64) -> TimeWindow {
        TimeWindow::new(day(from), day(to)).unwrap()
    }

    fn metric_query(resource: &str, w: TimeWindow, statistic: Statistic) -> MetricQuery {
        MetricQuery {
            resource: ResourceId::new(resource),
            metric: availscope_core::MetricRef::new("AWS/EC2", "StatusCheckFailed"),
            window: w,
            period_secs: 300,
            statistic,
            timeout: Duration::from_secs(5),
        }
    }

    fn event_query(resource: &str, w: TimeWindow) -> EventQuery {
        EventQuery {
            resource: ResourceId::new(resource),
            window: w,
            timeout: Duration::from_secs(5),
        }
    }

    const EXPORT: &str = r#"{
        "Label": "StatusCheckFailed",
        "Datapoints": [
            {"Timestamp": "2024-07-01T00:00:00Z", "Sum": 0.0, "Unit": "Count"},
            {"Timestamp": "2024-07-02T00:00:00+00:00", "Sum": 1.0, "Average": 1.0, "Unit": "Count"},
            {"Timestamp": "2024-07-03T00:00:00Z", "Average": 0.0, "Unit": "Count"},
            {"Timestamp": "2024-07-09T00:00:00Z", "Sum": 2.0, "Unit": "Count"}
        ]
    }"#;

    fn trail(records: &str) -> String {
        format!(r#"{{"Records": [{records}]}}"#)
    }

    const STOP: &str = r#"{
        "eventTime": "2024-07-05T00:00:00Z",
        "eventSource": "ec2.amazonaws.com",
        "eventName": "StopInstances",
        "requestParameters": {"instancesSet": {"items": [{"instanceId": "i-0abc"}]}}
    }"#;

    const START: &str = r#"{
        "eventTime": "2024-07-07T00:00:00Z",
        "eventSource": "ec2.amazonaws.com",
        "eventName": "StartInstances",
        "resources": [{"resourceName": "i-0abc", "resourceType": "AWS::EC2::Instance"}]
    }"#;

    const OTHER: &str = r#"{
        "eventTime": "2024-07-06T00:00:00Z",
        "eventSource": "s3.amazonaws.com",
        "eventName": "PutObject"
    }"#;

    // -----------------------------------------------------------------------
    // CloudWatch
    // -----------------------------------------------------------------------

    #[test]
    fn test_cloudwatch_filters_window_and_statistic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i-0abc.json");
        fs::write(&path, EXPORT).unwrap();
        let source = CloudWatchFileSource::new().with_file("i-0abc", &path);

        let sums = source
            .query(&metric_query("i-0abc", window(0, 5), Statistic::Sum))
            .unwrap();
        assert_eq!(sums.len(), 2);
        assert_eq!(sums[1].value, 1.0);

        let averages = source
            .query(&metric_query("i-0abc", window(0, 30), Statistic::Average))
            .unwrap();
        assert_eq!(averages.len(), 2);

        // End of window is exclusive.
        let first_day = source
            .query(&metric_query("i-0abc", window(0, 1), Statistic::Sum))
            .unwrap();
        assert_eq!(first_day.len(), 1);
    }

    #[test]
    fn test_cloudwatch_unknown_resource_is_unavailable() {
        let source = CloudWatchFileSource::new();
        let err = source
            .query(&metric_query("i-missing", window(0, 1), Statistic::Sum))
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[test]
    fn test_cloudwatch_bad_json_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let source = CloudWatchFileSource::new().with_file("svc", &path);
        let err = source
            .query(&metric_query("svc", window(0, 1), Statistic::Average))
            .unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    // -----------------------------------------------------------------------
    // CloudTrail
    // -----------------------------------------------------------------------

    #[test]
    fn test_cloudtrail_reads_plain_and_gzip_in_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("AWSLogs/123456789012/CloudTrail/us-east-1/2024/07/05");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("a.json"), trail(&format!("{STOP},{OTHER}"))).unwrap();

        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(trail(START).as_bytes()).unwrap();
        fs::write(nested.join("b.json.gz"), gz.finish().unwrap()).unwrap();
        fs::write(nested.join("digest.txt"), "ignored").unwrap();

        let source = CloudTrailFileSource::new([dir.path()]);
        assert_eq!(source.log_files().unwrap().len(), 2);

        let events = source.query(&event_query("i-0abc", window(0, 30))).unwrap();
        assert_eq!(events.len(), 2);
        let kinds: Vec<LifecycleKind> = events.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&LifecycleKind::Stop));
        assert!(kinds.contains(&LifecycleKind::Start));
    }

    #[test]
    fn test_cloudtrail_filters_instance_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        fs::write(&path, trail(&format!("{STOP},{START}"))).unwrap();
        let source = CloudTrailFileSource::new([&path]);

        assert!(source.query(&event_query("i-other", window(0, 30))).unwrap().is_empty());
        let early = source.query(&event_query("i-0abc", window(0, 6))).unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].kind, LifecycleKind::Stop);
        assert_eq!(early[0].timestamp, day(4));
    }

    #[test]
    fn test_instance_ids_deduplicated() {
        let record: TrailRecord = serde_json::from_str(
            r#"{
                "eventTime": "2024-07-05T00:00:00Z",
                "eventSource": "ec2.amazonaws.com",
                "eventName": "TerminateInstances",
                "resources": [{"resourceName": "i-1"}],
                "requestParameters": {"instancesSet": {"items": [
                    {"instanceId": "i-1"}, {"instanceId": "i-2"}
                ]}}
            }"#,
        )
        .unwrap();
        assert_eq!(record.instance_ids(), vec!["i-1", "i-2"]);
    }

    #[test]
    fn test_missing_log_dir_is_unavailable() {
        let source = CloudTrailFileSource::new(["/nonexistent/availscope/trail"]);
        let err = source.query(&event_query("i-0abc", window(0, 1))).unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
