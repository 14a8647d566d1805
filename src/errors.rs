//! Typed error hierarchy for the conductor pipeline.
//!
//! Top-level enums by subsystem:
//! - `PipelineError`: terminal outcomes of a pipeline run
//! - `TransitionError`: illegal phase sequencing
//! - `RetryError`: what the retry executor gives up with
//! - `ValidationError`: missing or unusable phase artifacts
//! - `LedgerError`: cost accounting failures

use crate::phase::Phase;
use crate::retry::classify::FailureKind;
use thiserror::Error;

/// Terminal errors returned by `Orchestrator::run`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Budget exceeded for project {project_id}: spent ${spent:.2} of ${limit:.2}")]
    BudgetExceeded {
        project_id: String,
        spent: f64,
        limit: f64,
    },

    #[error("Quota exhausted during phase {phase}: {message}")]
    QuotaExhausted { phase: Phase, message: String },

    #[error("Phase {phase} failed after {attempts} attempt(s): {message}")]
    PhaseFailed {
        phase: Phase,
        attempts: u32,
        message: String,
    },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("No executor registered for phase {phase}")]
    MissingExecutor { phase: Phase },

    #[error("Pipeline cancelled before phase {phase}")]
    Cancelled { phase: Phase },

    #[error("Failed to persist pipeline state: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl PipelineError {
    /// Daily quota exhaustion: the caller should wait for the quota window to reset.
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, PipelineError::QuotaExhausted { .. })
    }

    /// Errors after which re-running the same pipeline later can succeed
    /// without changes (quota reset, raised budget, cancellation).
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            PipelineError::QuotaExhausted { .. }
                | PipelineError::BudgetExceeded { .. }
                | PipelineError::Cancelled { .. }
        )
    }
}

/// A transition that is not in the static table for the current phase.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid transition from {from} to {to}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

/// Why the retry executor stopped retrying.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Quota exhausted for {operation}: {message}")]
    QuotaExhausted { operation: String, message: String },

    #[error("{operation} failed with non-retryable {kind} error: {message}")]
    NonRetryable {
        operation: String,
        kind: FailureKind,
        message: String,
    },

    #[error("{operation} still failing after {attempts} attempt(s): {message}")]
    AttemptsExhausted {
        operation: String,
        attempts: u32,
        kind: FailureKind,
        message: String,
    },

    #[error("Failed to persist retry checkpoint: {0}")]
    Checkpoint(#[source] anyhow::Error),
}

impl RetryError {
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, RetryError::QuotaExhausted { .. })
    }

    /// Classification of the last failure, when one was observed.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            RetryError::QuotaExhausted { .. } => Some(FailureKind::QuotaExhausted),
            RetryError::NonRetryable { kind, .. } | RetryError::AttemptsExhausted { kind, .. } => {
                Some(*kind)
            }
            RetryError::Checkpoint(_) => None,
        }
    }
}

/// A phase ran but its artifacts do not satisfy the phase postconditions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Phase {phase} did not produce {file} and returned no usable content")]
    MissingArtifact { phase: Phase, file: String },

    #[error("Phase {phase} returned a status message instead of content")]
    StatusOnlyResult { phase: Phase },

    #[error("Phase {phase} is incomplete: {reason}")]
    Incomplete { phase: Phase, reason: String },

    #[error("Phase {phase} is missing expected files: {}", missing.join(", "))]
    MissingFiles { phase: Phase, missing: Vec<String> },
}

/// Cost accounting failures. The budget governor turns these into a
/// degraded allow, never into a blocked pipeline.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid cost amount {amount} for worker {worker}")]
    InvalidAmount { worker: String, amount: f64 },

    #[error("Cost backend unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_budget_exceeded_formats_amounts() {
        let err = PipelineError::BudgetExceeded {
            project_id: "shop".into(),
            spent: 12.5,
            limit: 10.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("shop"));
        assert!(msg.contains("$12.50"));
        assert!(msg.contains("$10.00"));
        assert!(err.is_retryable_later());
        assert!(!err.is_quota_exhausted());
    }

    #[test]
    fn pipeline_error_quota_is_distinct() {
        let err = PipelineError::QuotaExhausted {
            phase: Phase::Designer,
            message: "per day".into(),
        };
        assert!(err.is_quota_exhausted());
        assert!(err.is_retryable_later());
    }

    #[test]
    fn pipeline_error_phase_failed_is_fatal() {
        let err = PipelineError::PhaseFailed {
            phase: Phase::Development,
            attempts: 4,
            message: "missing tests".into(),
        };
        assert!(!err.is_retryable_later());
        assert!(err.to_string().contains("development"));
    }

    #[test]
    fn pipeline_error_converts_from_transition_error() {
        let inner = TransitionError {
            from: Phase::Meta,
            to: Phase::Frontend,
        };
        let err: PipelineError = inner.clone().into();
        match err {
            PipelineError::InvalidTransition(e) => assert_eq!(e, inner),
            _ => panic!("Expected InvalidTransition"),
        }
    }

    #[test]
    fn retry_error_kind_reports_last_failure() {
        let err = RetryError::AttemptsExhausted {
            operation: "designer".into(),
            attempts: 3,
            kind: FailureKind::RateLimited,
            message: "429".into(),
        };
        assert_eq!(err.kind(), Some(FailureKind::RateLimited));
        assert!(!err.is_quota_exhausted());

        let quota = RetryError::QuotaExhausted {
            operation: "designer".into(),
            message: "per day".into(),
        };
        assert!(quota.is_quota_exhausted());
        assert_eq!(quota.kind(), Some(FailureKind::QuotaExhausted));
    }

    #[test]
    fn validation_error_lists_missing_files() {
        let err = ValidationError::MissingFiles {
            phase: Phase::Development,
            missing: vec!["src/main.rs".into(), "tests/api.rs".into()],
        };
        assert!(err.to_string().contains("src/main.rs, tests/api.rs"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PipelineError::MissingExecutor { phase: Phase::Meta });
        assert_std_error(&TransitionError {
            from: Phase::Failed,
            to: Phase::Meta,
        });
        assert_std_error(&LedgerError::Unavailable("down".into()));
        assert_std_error(&ValidationError::StatusOnlyResult { phase: Phase::Meta });
    }
}
