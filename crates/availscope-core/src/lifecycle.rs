//! Downtime reconstruction from discrete lifecycle events.
//!
//! When a resource has no periodic health metric, its stop/start history is
//! replayed through a two-state machine (running / stopped) and the time
//! spent stopped inside the window is summed. Repeated transitions into the
//! state the resource is already in are ignored, so duplicated or reordered
//! vendor events cannot double count.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::window::TimeWindow;

/// Kind of state transition recorded by the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Start,
    Stop,
    Terminate,
}

impl LifecycleKind {
    /// Map an EC2 API call name (`StartInstances`, ...) to a kind.
    pub fn from_api_call(name: &str) -> Option<Self> {
        match name {
            "StartInstances" => Some(Self::Start),
            "StopInstances" => Some(Self::Stop),
            "TerminateInstances" => Some(Self::Terminate),
            _ => None,
        }
    }
}

impl std::fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Terminate => write!(f, "terminate"),
        }
    }
}

/// One timestamped lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: LifecycleKind,
    pub resource_id: String,
}

impl LifecycleEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        kind: LifecycleKind,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            kind,
            resource_id: resource_id.into(),
        }
    }
}

/// State assumed before the first event in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialState {
    #[default]
    Running,
    Stopped,
}

/// How a terminate while running is treated. A terminate while already
/// stopped changes nothing under every setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateHandling {
    /// The terminate is a no-op: the resource stays running and later
    /// stop/start pairs are charged as usual.
    #[default]
    Ignore,
    /// Terminate behaves exactly like stop.
    Stop,
    /// Terminating a running resource retires it: nothing after the
    /// terminate is charged and later events are ignored.
    Retire,
}

/// A period the resource spent stopped. `to == None` means still stopped
/// at the end of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppedInterval {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

impl StoppedInterval {
    pub fn is_open(&self) -> bool {
        self.to.is_none()
    }

    /// Length, closing an open interval at `window.end()`.
    pub fn duration(&self, window: &TimeWindow) -> TimeDelta {
        self.to.unwrap_or(window.end()) - self.from
    }
}

/// Outcome of replaying an event history.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub intervals: Vec<StoppedInterval>,
    pub total_down: TimeDelta,
    /// Events supplied.
    pub events: usize,
    /// Events that did not change state (duplicates, out-of-order, ignored
    /// terminates, anything after a retire).
    pub ignored: usize,
}

impl Reconstruction {
    pub fn total_down_seconds(&self) -> f64 {
        self.total_down.num_milliseconds() as f64 / 1000.0
    }

    pub fn total_down_minutes(&self) -> f64 {
        self.total_down_seconds() / 60.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Stopped { since: DateTime<Utc> },
    Retired,
}

/// Replay `events` over `window` and sum the stopped time.
///
/// Events are sorted by timestamp first (stable, so equal timestamps keep
/// input order). Timestamps are clamped into the window, which keeps the
/// arithmetic bounded even if an adapter lets a boundary event slip through.
///
/// Fails with [`EngineError::NoEvents`] when `events` is empty: the caller
/// should fall back to metric classification.
pub fn reconstruct_downtime(
    resource: &str,
    events: &[LifecycleEvent],
    window: &TimeWindow,
    initial: InitialState,
    terminate: TerminateHandling,
) -> Result<Reconstruction> {
    if events.is_empty() {
        return Err(EngineError::NoEvents {
            resource: resource.to_string(),
        });
    }

    let mut sorted: Vec<&LifecycleEvent> = events.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut state = match initial {
        InitialState::Running => RunState::Running,
        InitialState::Stopped => RunState::Stopped {
            since: window.start(),
        },
    };
    let mut intervals = Vec::new();
    let mut ignored = 0;

    for event in sorted {
        let at = window.clamp(event.timestamp);
        state = match (state, event.kind) {
            (RunState::Running, LifecycleKind::Stop) => RunState::Stopped { since: at },
            (RunState::Running, LifecycleKind::Terminate) => match terminate {
                TerminateHandling::Ignore => {
                    ignored += 1;
                    RunState::Running
                }
                TerminateHandling::Stop => RunState::Stopped { since: at },
                TerminateHandling::Retire => RunState::Retired,
            },
            (RunState::Stopped { since }, LifecycleKind::Start) => {
                intervals.push(StoppedInterval {
                    from: since,
                    to: Some(at),
                });
                RunState::Running
            }
            (unchanged, _) => {
                ignored += 1;
                unchanged
            }
        };
    }

    if let RunState::Stopped { since } = state {
        intervals.push(StoppedInterval {
            from: since,
            to: None,
        });
    }

    let total_down = intervals
        .iter()
        .map(|i| i.duration(window))
        .fold(TimeDelta::zero(), |acc, d| acc + d);

    Ok(Reconstruction {
        intervals,
        total_down,
        events: events.len(),
        ignored,
    })
}
