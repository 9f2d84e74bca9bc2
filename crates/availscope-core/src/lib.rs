//! # availscope-core
//!
//! **Reconstruct how long a resource was down from whatever telemetry it left
//! behind.**
//!
//! `availscope-core` turns periodic health metrics (status checks, running
//! task counts, healthy host counts) or discrete lifecycle events (start,
//! stop, terminate) into a downtime figure and an uptime percentage over a
//! reporting window.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use availscope_core::{TimeWindow, aggregate, fleet_reliability};
//!
//! let window = TimeWindow::last_days(chrono::Utc::now(), 30).unwrap();
//! let per_resource: BTreeMap<String, f64> =
//!     [("ec2".to_string(), 60.0), ("ecs".to_string(), 30.0)].into();
//!
//! for report in aggregate(&per_resource, &window).unwrap().values() {
//!     println!("{}: {:.2}% up", report.resource_id, report.uptime_percent);
//! }
//! println!("fleet: {:.5}%", fleet_reliability(&per_resource, &window).unwrap());
//! ```
//!
//! ## Architecture
//!
//! Metric path: Source → chunked fetch → normalize → classify → aggregate
//!
//! Event path: Source → lifecycle replay → aggregate
//!
//! - A long window is split into bounded chunks; a failed chunk is skipped
//!   and counted, never fatal.
//! - Classification charges down samples *and* missing buckets. No data is
//!   treated as down, not as up.
//! - Lifecycle replay is a two-state machine, so duplicated and reordered
//!   events are harmless.
//!
//! Sources implement [`MetricSource`] or [`EventSource`]; the engine itself
//! performs no I/O and reports progress through an [`EventSink`].

pub mod aggregate;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod profile;
pub mod sample;
pub mod sink;
pub mod source;
pub mod window;

pub use aggregate::{
    FleetReport, MethodUsed, ReliabilityReport, ReportStatus, ResourceOutcome, aggregate,
    fleet_reliability, uptime_percent,
};
pub use cancel::CancellationToken;
pub use classify::{DownRule, DowntimePolicy, DowntimeResult, classify, classify_with};
pub use config::EngineConfig;
pub use engine::{Engine, Method, MetricDowntime, ResourceJob};
pub use error::{EngineError, Result, SourceError};
pub use fetch::{ChunkedRangeFetcher, FetchOutcome, FetchRequest};
pub use lifecycle::{
    InitialState, LifecycleEvent, LifecycleKind, Reconstruction, StoppedInterval,
    TerminateHandling, reconstruct_downtime,
};
pub use profile::{MetricProfile, presets};
pub use sample::{Sample, SampleSeries, Statistic, normalize};
pub use sink::{EventSink, LogSink, MemorySink, NullSink, PipelineEvent};
pub use source::{
    Dimension, EventQuery, EventSource, MetricQuery, MetricRef, MetricSource, ResourceId,
};
pub use window::{BucketSpec, TimeWindow};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
