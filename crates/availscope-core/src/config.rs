//! Engine configuration.
//!
//! Every field has a default, so a plan file only needs to name what it
//! overrides:
//!
//! ```json
//! { "chunk_concurrency": 3, "policy": { "charge_gaps": false } }
//! ```

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::classify::DowntimePolicy;
use crate::error::{EngineError, Result};
use crate::lifecycle::{InitialState, TerminateHandling};

/// Knobs shared by every resource in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest span one metric query may cover when a profile does not say.
    pub max_chunk_span_secs: i64,
    /// Chunk queries in flight per resource.
    pub chunk_concurrency: usize,
    /// Per-query timeout in milliseconds. Zero waits indefinitely.
    pub query_timeout_ms: u64,
    /// Resources processed at once by a batch run.
    pub resource_concurrency: usize,
    pub policy: DowntimePolicy,
    pub initial_state: InitialState,
    pub terminate: TerminateHandling,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_span_secs: 5 * 86_400,
            chunk_concurrency: 1,
            query_timeout_ms: 30_000,
            resource_concurrency: 4,
            policy: DowntimePolicy::default(),
            initial_state: InitialState::Running,
            terminate: TerminateHandling::Ignore,
        }
    }
}

impl EngineConfig {
    /// Chunk span, or [`EngineError::InvalidChunkSpan`] when it is not
    /// positive or does not fit a [`TimeDelta`].
    pub fn max_chunk_span(&self) -> Result<TimeDelta> {
        TimeDelta::try_seconds(self.max_chunk_span_secs)
            .filter(|s| *s > TimeDelta::zero())
            .ok_or(EngineError::InvalidChunkSpan)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Reject settings no run could use.
    pub fn validate(&self) -> Result<()> {
        self.max_chunk_span().map(|_| ())
    }
}
