use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rule::RecurrenceRule;

/// Lifecycle state of a schedule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    /// Waiting for its trigger time.
    Pending,
    /// Claimed by a release loop; invisible to `find_pending` until the
    /// claimer either re-arms or completes the entry.
    Running,
    /// Released for the last time (one-shot done, or recurring series
    /// exhausted or cancelled).
    Completed,
}

impl std::fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleState::Pending => "pending",
            ScheduleState::Running => "running",
            ScheduleState::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScheduleState::Pending),
            "running" => Ok(ScheduleState::Running),
            "completed" => Ok(ScheduleState::Completed),
            other => Err(format!("unknown schedule state: {other}")),
        }
    }
}

/// The persisted unit: a message paired with when (and how often) it fires.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// Opaque unique identifier (UUID v4 when generated by the facade).
    pub id: String,
    /// Serialized message bytes. The store never inspects these; encoding
    /// and decoding belong to the host's payload codec.
    pub payload: Vec<u8>,
    /// Next moment this entry becomes eligible for release (UTC).
    pub trigger_at: DateTime<Utc>,
    /// Recurrence series anchor; `None` for one-shot schedules.
    pub start_at: Option<DateTime<Utc>>,
    /// Recurrence rule; `None` means the entry fires exactly once.
    pub rule: Option<RecurrenceRule>,
    pub state: ScheduleState,
    /// Set once at insert, never mutated.
    pub created_at: DateTime<Utc>,
}
