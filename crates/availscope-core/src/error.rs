//! Error taxonomy for the reconstruction engine.
//!
//! Errors fall into three groups and callers are expected to treat them
//! differently:
//! - recover-and-continue: [`SourceError`] on a single chunk, absorbed by the
//!   fetcher and surfaced only as a skipped-chunk count,
//! - fail-this-call: [`EngineError::InvalidWindow`] and friends, which never
//!   affect sibling resources in a batch,
//! - fallback signal: [`EngineError::NoEvents`], telling the caller to use the
//!   metric path instead.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a single source query failed (`SourceUnavailable`).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("query timed out after {0:.1}s")]
    Timeout(f64),

    #[error("query throttled by upstream: {0}")]
    Throttled(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed source data: {0}")]
    Malformed(String),
}

/// Errors returned by engine entry points.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("chunk span must be positive and within range")]
    InvalidChunkSpan,

    #[error("sampling period must be positive and within range")]
    InvalidPeriod,

    #[error("no samples for {resource} across the whole window")]
    NoData { resource: String },

    #[error("no lifecycle events for {resource}; use metric-based classification")]
    NoEvents { resource: String },

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("downtime computation panicked")]
    Panicked,
}

impl EngineError {
    /// True for errors that ask the caller to switch strategy rather than fail.
    pub fn is_fallback_signal(&self) -> bool {
        matches!(self, Self::NoEvents { .. })
    }

    /// True for errors that end the current call but leave a batch running.
    pub fn is_fatal_for_call(&self) -> bool {
        !self.is_fallback_signal()
    }

    /// Short machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidWindow { .. } => "invalid_window",
            Self::InvalidChunkSpan => "invalid_chunk_span",
            Self::InvalidPeriod => "invalid_period",
            Self::NoData { .. } => "no_data",
            Self::NoEvents { .. } => "no_events",
            Self::Source(_) => "source_unavailable",
            Self::Panicked => "worker_failed",
        }
    }
}
