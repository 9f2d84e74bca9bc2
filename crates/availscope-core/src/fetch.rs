//! Chunked range fetching.
//!
//! Metric backends cap how much history one query may cover, so a long
//! window is split into spans of at most `max_chunk_span` and queried piece
//! by piece. A chunk that fails or times out is skipped and counted; the
//! fetch as a whole only fails on invalid input. Results are concatenated in
//! chunk order regardless of which query finished first.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::error::{EngineError, Result, SourceError};
use crate::sample::{Sample, Statistic};
use crate::sink::{EventSink, PipelineEvent};
use crate::source::{MetricQuery, MetricRef, MetricSource, ResourceId};
use crate::window::TimeWindow;

/// What to read, independent of the window it is read over.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub resource: ResourceId,
    pub metric: MetricRef,
    pub period_secs: i64,
    pub statistic: Statistic,
}

/// Samples gathered across all chunks plus bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchOutcome {
    /// Raw samples in chunk order. Not yet sorted or deduplicated.
    #[serde(skip)]
    pub samples: Vec<Sample>,
    /// Chunks the window was split into.
    pub chunks: usize,
    /// Chunks that returned data (possibly empty).
    pub fetched_chunks: usize,
    /// Chunks whose query failed or timed out.
    pub skipped_chunks: usize,
    /// Cancellation stopped the fetch before every chunk was attempted.
    pub partial: bool,
}

impl FetchOutcome {
    /// Some chunk was lost, so the series may have holes that are not real
    /// outages.
    pub fn is_degraded(&self) -> bool {
        self.skipped_chunks > 0 || self.partial
    }
}

/// Splits a window into bounded chunks and queries each one.
#[derive(Debug, Clone)]
pub struct ChunkedRangeFetcher {
    max_chunk_span: TimeDelta,
    concurrency: usize,
    timeout: Duration,
}

impl ChunkedRangeFetcher {
    /// Fetcher issuing one query at a time with a 30 second per-chunk timeout.
    pub fn new(max_chunk_span: TimeDelta) -> Result<Self> {
        if max_chunk_span <= TimeDelta::zero() {
            return Err(EngineError::InvalidChunkSpan);
        }
        Ok(Self {
            max_chunk_span,
            concurrency: 1,
            timeout: Duration::from_secs(30),
        })
    }

    /// Number of chunk queries allowed in flight at once (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Per-chunk timeout. `Duration::ZERO` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_chunk_span(&self) -> TimeDelta {
        self.max_chunk_span
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Like [`fetch`](Self::fetch) over raw bounds. An empty or inverted
    /// range yields an empty outcome without touching the source.
    pub fn fetch_range(
        &self,
        request: &FetchRequest,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        source: &Arc<dyn MetricSource>,
        cancel: &CancellationToken,
        sink: &dyn EventSink,
    ) -> Result<FetchOutcome> {
        if start >= end {
            return Ok(FetchOutcome::default());
        }
        let window = TimeWindow::new(start, end)?;
        self.fetch(request, &window, source, cancel, sink)
    }

    /// Query every chunk of `window` and concatenate the results.
    ///
    /// Cancellation is checked before each round of queries. Once raised,
    /// the remaining chunks are abandoned and the outcome is marked partial.
    pub fn fetch(
        &self,
        request: &FetchRequest,
        window: &TimeWindow,
        source: &Arc<dyn MetricSource>,
        cancel: &CancellationToken,
        sink: &dyn EventSink,
    ) -> Result<FetchOutcome> {
        if request.period_secs <= 0 {
            return Err(EngineError::InvalidPeriod);
        }
        let chunks = window.split(self.max_chunk_span)?;
        let total = chunks.len();
        let resource = request.resource.name.clone();
        let mut outcome = FetchOutcome {
            chunks: total,
            ..FetchOutcome::default()
        };

        for (round, batch) in chunks.chunks(self.concurrency).enumerate() {
            let first = round * self.concurrency;
            if cancel.is_cancelled() {
                outcome.partial = true;
                sink.emit(&PipelineEvent::FetchCancelled {
                    resource: resource.clone(),
                    completed: first,
                    chunks: total,
                });
                break;
            }

            let results = self.run_round(request, batch, source);
            for (offset, (chunk, result)) in batch.iter().zip(results).enumerate() {
                let index = first + offset;
                match result {
                    Ok(samples) => {
                        sink.emit(&PipelineEvent::ChunkFetched {
                            resource: resource.clone(),
                            chunk: index,
                            chunks: total,
                            window: *chunk,
                            samples: samples.len(),
                        });
                        outcome.fetched_chunks += 1;
                        outcome.samples.extend(samples);
                    }
                    Err(error) => {
                        sink.emit(&PipelineEvent::ChunkSkipped {
                            resource: resource.clone(),
                            chunk: index,
                            chunks: total,
                            window: *chunk,
                            error,
                        });
                        outcome.skipped_chunks += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Run one round of chunk queries, each on its own thread, and wait for
    /// them up to the timeout. Results come back in `batch` order.
    ///
    /// A query still running at the deadline is abandoned: its thread keeps
    /// the source alive until it returns, and its late result is dropped.
    fn run_round(
        &self,
        request: &FetchRequest,
        batch: &[TimeWindow],
        source: &Arc<dyn MetricSource>,
    ) -> Vec<std::result::Result<Vec<Sample>, SourceError>> {
        let (tx, rx) = mpsc::channel();
        for (slot, chunk) in batch.iter().enumerate() {
            let query = MetricQuery {
                resource: request.resource.clone(),
                metric: request.metric.clone(),
                window: *chunk,
                period_secs: request.period_secs,
                statistic: request.statistic,
                timeout: self.timeout,
            };
            let source = Arc::clone(source);
            let tx = tx.clone();
            std::thread::spawn(move || {
                let result = source.query(&query);
                let _ = tx.send((slot, result));
            });
        }
        drop(tx);

        let mut results: Vec<Option<std::result::Result<Vec<Sample>, SourceError>>> =
            batch.iter().map(|_| None).collect();
        // A timeout too large to add to the clock behaves as no timeout.
        let deadline = if self.timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(self.timeout)
        };

        for _ in 0..batch.len() {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    rx.recv_timeout(remaining).ok()
                }
                None => rx.recv().ok(),
            };
            match received {
                Some((slot, result)) => results[slot] = Some(result),
                None => break,
            }
        }

        let timed_out = self.timeout.as_secs_f64();
        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(SourceError::Timeout(timed_out))))
            .collect()
    }
}
