//! Recovery policy for failed phases.
//!
//! [`ErrorRecoveryEngine::decide`] maps an [`ErrorContext`] to a
//! [`RecoveryVerdict`]. The engine never touches the state machine; the
//! orchestrator carries out whatever the verdict says.
//!
//! Policy, first match wins:
//! - `failure_count > rollback_threshold`: roll back to the context's target,
//!   or the failed phase's predecessor. No retry.
//! - `failure_count > reassign_threshold`: retry and suggest an alternative worker.
//! - otherwise: plain retry.
//!
//! The last few contexts per error kind are kept for trend analysis; they do
//! not influence the verdict yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

use crate::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limit or timeout that outlived the retry executor.
    Transient,
    /// The executor failed in a way the retry executor would not retry.
    Execution,
    /// Artifacts missing or unusable after the phase ran.
    Validation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Execution => write!(f, "execution"),
            ErrorKind::Validation => write!(f, "validation"),
        }
    }
}

/// Everything the engine needs to know about one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_kind: ErrorKind,
    pub failed_phase: Phase,
    pub message: String,
    pub failure_count: u32,
    pub rollback_target: Option<Phase>,
    pub recovery_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(
        error_kind: ErrorKind,
        failed_phase: Phase,
        message: impl Into<String>,
        failure_count: u32,
    ) -> Self {
        Self {
            error_kind,
            failed_phase,
            message: message.into(),
            failure_count,
            rollback_target: None,
            recovery_actions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_rollback_target(mut self, target: Phase) -> Self {
        self.rollback_target = Some(target);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryVerdict {
    pub retry: bool,
    pub rollback: bool,
    pub rollback_target: Option<Phase>,
    pub reassign: bool,
    pub alternative_worker: Option<String>,
    pub reason: String,
}

impl RecoveryVerdict {
    fn retry(reason: impl Into<String>) -> Self {
        Self {
            retry: true,
            rollback: false,
            rollback_target: None,
            reassign: false,
            alternative_worker: None,
            reason: reason.into(),
        }
    }

    /// Neither retry nor rollback is possible.
    pub fn is_terminal(&self) -> bool {
        !self.retry && !self.rollback
    }
}

/// Thresholds for the recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// `failure_count` above this triggers a rollback.
    pub rollback_threshold: u32,
    /// `failure_count` above this adds a reassignment suggestion to the retry.
    pub reassign_threshold: u32,
    /// Contexts kept per error kind.
    pub history_size: usize,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            rollback_threshold: 3,
            reassign_threshold: 1,
            history_size: 5,
        }
    }
}

#[derive(Debug, Default)]
pub struct ErrorRecoveryEngine {
    policy: RecoveryPolicy,
    history: HashMap<ErrorKind, VecDeque<ErrorContext>>,
}

impl ErrorRecoveryEngine {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            history: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Decide how to recover from `context` and remember it.
    pub fn decide(&mut self, context: &ErrorContext) -> RecoveryVerdict {
        self.remember(context);

        let phase = context.failed_phase;
        let count = context.failure_count;

        let verdict = if count > self.policy.rollback_threshold {
            match context.rollback_target.or_else(|| phase.predecessor()) {
                Some(target) => RecoveryVerdict {
                    retry: false,
                    rollback: true,
                    rollback_target: Some(target),
                    reassign: false,
                    alternative_worker: None,
                    reason: format!(
                        "{} failed {} times, rolling back to {}",
                        phase, count, target
                    ),
                },
                None => RecoveryVerdict {
                    retry: false,
                    rollback: false,
                    rollback_target: None,
                    reassign: false,
                    alternative_worker: None,
                    reason: format!(
                        "{} failed {} times and has no earlier phase to roll back to",
                        phase, count
                    ),
                },
            }
        } else if count > self.policy.reassign_threshold {
            let worker = phase.alternative_worker().map(str::to_string);
            RecoveryVerdict {
                reassign: worker.is_some(),
                alternative_worker: worker,
                ..RecoveryVerdict::retry(format!(
                    "{} failed {} times, retrying with reassignment suggested",
                    phase, count
                ))
            }
        } else {
            RecoveryVerdict::retry(format!("{} failed once, retrying", phase))
        };

        info!(
            phase = %phase,
            failure_count = count,
            kind = %context.error_kind,
            retry = verdict.retry,
            rollback = verdict.rollback,
            reassign = verdict.reassign,
            "Recovery verdict"
        );
        verdict
    }

    /// Most recent contexts recorded for `kind`, oldest first.
    pub fn history(&self, kind: ErrorKind) -> Vec<&ErrorContext> {
        self.history
            .get(&kind)
            .map(|h| h.iter().collect())
            .unwrap_or_default()
    }

    fn remember(&mut self, context: &ErrorContext) {
        let limit = self.policy.history_size.max(1);
        let entries = self.history.entry(context.error_kind).or_default();
        entries.push_back(context.clone());
        while entries.len() > limit {
            entries.pop_front();
        }
        debug!(kind = %context.error_kind, retained = entries.len(), "Recorded failure");
    }
}
