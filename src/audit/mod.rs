//! Durable activity log of pipeline runs.
//!
//! Every phase start, transition, failure, retry and recovery decision is
//! appended as one JSON line to `activity.jsonl` in the project's run
//! directory, regardless of outcome.

mod logger;

pub use logger::ActivityLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    RunStarted,
    PhaseStarted,
    PhaseSkipped,
    PhaseCompleted,
    /// Forward move of the state machine.
    Transition,
    Retry,
    Failure,
    Recovery,
    Rollback,
    BudgetWarning,
    BudgetDenied,
    QuotaExhausted,
    Cancelled,
    RunCompleted,
    RunFailed,
    /// Run stopped by an error that does not mark the pipeline failed.
    RunAborted,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub project_id: String,
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub message: String,
}
