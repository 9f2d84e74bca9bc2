//! Structured pipeline events and the sinks that receive them.
//!
//! The engine performs no I/O of its own. Everything worth telling an
//! operator (a skipped chunk, a clamp, a fallback) becomes a
//! [`PipelineEvent`] handed to the [`EventSink`] the caller supplied.

use std::sync::Mutex;

use serde::Serialize;

use crate::error::{EngineError, SourceError};
use crate::window::TimeWindow;

/// Something that happened inside a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    ChunkFetched {
        resource: String,
        chunk: usize,
        chunks: usize,
        window: TimeWindow,
        samples: usize,
    },
    ChunkSkipped {
        resource: String,
        chunk: usize,
        chunks: usize,
        window: TimeWindow,
        #[serde(serialize_with = "display")]
        error: SourceError,
    },
    FetchCancelled {
        resource: String,
        completed: usize,
        chunks: usize,
    },
    SeriesMissing {
        resource: String,
        charged_minutes: f64,
    },
    DowntimeClamped {
        resource: String,
        raw_minutes: f64,
        window_minutes: f64,
    },
    EventsReplayed {
        resource: String,
        events: usize,
        stopped_intervals: usize,
        down_seconds: f64,
    },
    FallbackToMetric {
        resource: String,
    },
    ResourceCompleted {
        resource: String,
        downtime_minutes: f64,
    },
    ResourceFailed {
        resource: String,
        #[serde(serialize_with = "display")]
        error: EngineError,
    },
}

fn display<T: std::fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Receiver for pipeline events. Must be shareable across worker threads.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::ChunkFetched {
                resource,
                chunk,
                chunks,
                window,
                samples,
            } => log::debug!(
                "{resource}: chunk {}/{chunks} ({window}) returned {samples} samples",
                chunk + 1
            ),
            PipelineEvent::ChunkSkipped {
                resource,
                chunk,
                chunks,
                window,
                error,
            } => log::warn!(
                "{resource}: chunk {}/{chunks} ({window}) skipped: {error}",
                chunk + 1
            ),
            PipelineEvent::FetchCancelled {
                resource,
                completed,
                chunks,
            } => log::warn!(
                "{resource}: fetch cancelled after {completed}/{chunks} chunks, result is partial"
            ),
            PipelineEvent::SeriesMissing {
                resource,
                charged_minutes,
            } => log::warn!(
                "{resource}: no samples in window, charging {charged_minutes:.0} min as downtime"
            ),
            PipelineEvent::DowntimeClamped {
                resource,
                raw_minutes,
                window_minutes,
            } => log::warn!(
                "{resource}: computed downtime {raw_minutes:.1} min exceeds window {window_minutes:.1} min, clamped"
            ),
            PipelineEvent::EventsReplayed {
                resource,
                events,
                stopped_intervals,
                down_seconds,
            } => log::debug!(
                "{resource}: replayed {events} lifecycle events, {stopped_intervals} stopped intervals, {down_seconds:.0}s down"
            ),
            PipelineEvent::FallbackToMetric { resource } => {
                log::info!("{resource}: no lifecycle events, falling back to metric classification")
            }
            PipelineEvent::ResourceCompleted {
                resource,
                downtime_minutes,
            } => log::info!("{resource}: {downtime_minutes:.1} min downtime"),
            PipelineEvent::ResourceFailed { resource, error } => {
                log::error!("{resource}: {error}")
            }
        }
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &PipelineEvent) {}
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&PipelineEvent) -> bool) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| pred(e)).count())
            .unwrap_or(0)
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.emit(&PipelineEvent::FallbackToMetric {
            resource: "a".into(),
        });
        sink.emit(&PipelineEvent::ResourceCompleted {
            resource: "a".into(),
            downtime_minutes: 5.0,
        });
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], PipelineEvent::FallbackToMetric { .. }));
        assert_eq!(
            sink.count(|e| matches!(e, PipelineEvent::ResourceCompleted { .. })),
            1
        );
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = PipelineEvent::ResourceFailed {
            resource: "svc".into(),
            error: EngineError::InvalidPeriod,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "resource_failed");
        assert_eq!(json["error"], "sampling period must be positive");
    }

    #[test]
    fn test_log_sink_accepts_every_variant() {
        // No logger installed: exercising the match arms must not panic.
        let sink = LogSink;
        sink.emit(&PipelineEvent::SeriesMissing {
            resource: "x".into(),
            charged_minutes: 43200.0,
        });
        sink.emit(&PipelineEvent::FetchCancelled {
            resource: "x".into(),
            completed: 2,
            chunks: 6,
        });
    }
}
