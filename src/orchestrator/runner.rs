//! The pipeline driver.
//!
//! Runs the six working phases in order. Each phase is gated by the budget
//! governor, executed through the retry executor, validated, checkpointed and
//! only then moved forward in the state machine. Failures go to the recovery
//! engine, which decides between another attempt, a rollback and giving up.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audit::{ActivityKind, ActivityLog};
use crate::budget::{BudgetGovernor, BudgetLimits, CostLedger, GovernorConfig};
use crate::errors::{PipelineError, RetryError, ValidationError};
use crate::executor::{ASSIGNED_WORKER_KEY, PhaseExecutor, PhaseInputs};
use crate::orchestrator::checkpoint::PipelineCheckpoint;
use crate::orchestrator::state::PhaseStateMachine;
use crate::phase::{Phase, phase_end_percent, phase_start_percent};
use crate::progress::{NoopReporter, ProgressReporter, notify};
use crate::recovery::{ErrorContext, ErrorKind, ErrorRecoveryEngine, RecoveryPolicy};
use crate::retry::classify::ErrorClassifier;
use crate::retry::{RetryExecutor, Sleeper};
use crate::stack::{KeywordStackClassifier, StackClassifier, StackRequirements};
use crate::validation::{
    FileStructureValidator, ManifestValidator, check_development, check_frontend,
    resolve_artifact, scan_workspace,
};

pub const STATE_FILE: &str = "state.json";
pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const RETRY_CHECKPOINT_FILE: &str = "retry_checkpoint.json";
pub const ACTIVITY_LOG_FILE: &str = "activity.jsonl";

/// Everything the driver needs to know about one project's run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub project_id: String,
    /// Directory executors work in and write artifacts to.
    pub workspace: PathBuf,
    /// Directory holding state, checkpoints and the activity log.
    pub run_dir: PathBuf,
    /// Retry executor attempts per phase call.
    pub max_attempts: u32,
    pub default_wait: Duration,
    /// Outer attempts per phase before recovery stops retrying.
    pub max_phase_attempts: u32,
    pub max_rollbacks: u32,
    pub apply_reassignment: bool,
    pub recovery: RecoveryPolicy,
}

impl PipelineSettings {
    pub fn new(project_id: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        let project_id = project_id.into();
        let workspace = workspace.into();
        let run_dir = workspace
            .join(crate::config::CONDUCTOR_DIR)
            .join("runs")
            .join(&project_id);
        Self {
            project_id,
            workspace,
            run_dir,
            max_attempts: 5,
            default_wait: Duration::from_secs(60),
            max_phase_attempts: 4,
            max_rollbacks: 2,
            apply_reassignment: false,
            recovery: RecoveryPolicy::default(),
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.run_dir.join(STATE_FILE)
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.run_dir.join(CHECKPOINT_FILE)
    }

    pub fn retry_checkpoint_file(&self) -> PathBuf {
        self.run_dir.join(RETRY_CHECKPOINT_FILE)
    }

    pub fn activity_log(&self) -> PathBuf {
        self.run_dir.join(ACTIVITY_LOG_FILE)
    }
}

/// Validated output of one phase attempt.
struct PhaseSuccess {
    content: String,
    /// Retry executor attempt that produced the output.
    executor_attempt: u32,
}

/// Why a single attempt at a phase did not produce a usable result.
enum AttemptError {
    /// Feed into the recovery engine.
    Failed { kind: ErrorKind, message: String },
    /// Daily quota gone; stop the run without marking it failed.
    Quota(String),
    /// Abort immediately.
    Fatal(PipelineError),
}

impl From<ValidationError> for AttemptError {
    fn from(err: ValidationError) -> Self {
        AttemptError::Failed {
            kind: ErrorKind::Validation,
            message: err.to_string(),
        }
    }
}

pub struct Orchestrator {
    settings: PipelineSettings,
    executors: HashMap<Phase, Arc<dyn PhaseExecutor>>,
    state: PhaseStateMachine,
    retry: RetryExecutor,
    recovery: ErrorRecoveryEngine,
    governor: BudgetGovernor,
    stack_classifier: Arc<dyn StackClassifier>,
    file_validator: Arc<dyn FileStructureValidator>,
    progress: Arc<dyn ProgressReporter>,
    activity: ActivityLog,
    cancel: Arc<AtomicBool>,
    failure_counts: HashMap<Phase, u32>,
    rollbacks: u32,
}

impl Orchestrator {
    /// Open the pipeline for `settings.project_id`, resuming persisted state.
    pub fn new(settings: PipelineSettings) -> Self {
        let state = PhaseStateMachine::load(settings.state_file(), &settings.project_id);
        let retry = RetryExecutor::new(settings.retry_checkpoint_file());
        let recovery = ErrorRecoveryEngine::new(settings.recovery);
        let governor = BudgetGovernor::new(
            Box::new(CostLedger::new(BudgetLimits::default())),
            GovernorConfig::default(),
        );
        let activity = ActivityLog::new(settings.activity_log(), &settings.project_id);

        Self {
            settings,
            executors: HashMap::new(),
            state,
            retry,
            recovery,
            governor,
            stack_classifier: Arc::new(KeywordStackClassifier),
            file_validator: Arc::new(ManifestValidator),
            progress: Arc::new(NoopReporter),
            activity,
            cancel: Arc::new(AtomicBool::new(false)),
            failure_counts: HashMap::new(),
            rollbacks: 0,
        }
    }

    pub fn with_executor(mut self, phase: Phase, executor: Arc<dyn PhaseExecutor>) -> Self {
        self.executors.insert(phase, executor);
        self
    }

    pub fn with_governor(mut self, governor: BudgetGovernor) -> Self {
        self.governor = governor;
        self
    }

    pub fn with_stack_classifier(mut self, classifier: Arc<dyn StackClassifier>) -> Self {
        self.stack_classifier = classifier;
        self
    }

    pub fn with_file_validator(mut self, validator: Arc<dyn FileStructureValidator>) -> Self {
        self.file_validator = validator;
        self
    }

    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = reporter;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = self.retry.with_sleeper(sleeper);
        self
    }

    pub fn with_error_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.retry = self.retry.with_classifier(classifier);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Flag that stops the run at the next phase boundary once set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn current_phase(&self) -> Phase {
        self.state.current()
    }

    pub fn state(&self) -> &PhaseStateMachine {
        &self.state
    }

    pub fn governor(&self) -> &BudgetGovernor {
        &self.governor
    }

    pub fn recovery(&self) -> &ErrorRecoveryEngine {
        &self.recovery
    }

    /// Consecutive failures of `phase` since it last succeeded.
    pub fn failure_count(&self, phase: Phase) -> u32 {
        self.failure_counts.get(&phase).copied().unwrap_or(0)
    }

    pub fn rollbacks(&self) -> u32 {
        self.rollbacks
    }

    pub fn activity_log_path(&self) -> &Path {
        self.activity.path()
    }

    /// Drive the pipeline to `Completed`, resuming from the saved checkpoint.
    ///
    /// Returns the accumulated results keyed by phase result key.
    pub async fn run(
        &mut self,
        inputs: PhaseInputs,
    ) -> Result<BTreeMap<String, String>, PipelineError> {
        let checkpoint_file = self.settings.checkpoint_file();
        let checkpoint = match PipelineCheckpoint::load(&checkpoint_file) {
            Ok(Some(cp)) => {
                info!(
                    next_phase = %cp.next_phase,
                    project_id = %self.settings.project_id,
                    "Resuming from checkpoint"
                );
                cp
            }
            Ok(None) => PipelineCheckpoint::default(),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Ignoring unreadable checkpoint, starting over");
                PipelineCheckpoint::default()
            }
        };

        self.activity.record(
            ActivityKind::RunStarted,
            Some(checkpoint.next_phase),
            None,
            &format!("Run started at {}", checkpoint.next_phase),
        );

        let result = self.drive(&inputs, checkpoint).await;
        if let Err(e) = &result {
            self.record_abort(e);
        }
        result
    }

    async fn drive(
        &mut self,
        inputs: &PhaseInputs,
        mut checkpoint: PipelineCheckpoint,
    ) -> Result<BTreeMap<String, String>, PipelineError> {
        let mut next = checkpoint.next_phase;
        if next.is_working() {
            self.sync_state(next)?;
        }

        while next.is_working() {
            if self.cancel.load(Ordering::SeqCst) {
                info!(phase = %next, "Cancellation requested");
                self.activity
                    .record(ActivityKind::Cancelled, Some(next), None, "Run cancelled");
                return Err(PipelineError::Cancelled { phase: next });
            }
            next = self.run_phase(next, inputs, &mut checkpoint).await?;
        }

        self.finish(checkpoint)
    }

    /// Log errors that end the run without an entry of their own.
    fn record_abort(&self, err: &PipelineError) {
        let phase = match err {
            PipelineError::MissingExecutor { phase } => *phase,
            PipelineError::InvalidTransition(_) | PipelineError::Persistence(_) => {
                self.state.current()
            }
            _ => return,
        };
        error!(phase = %phase, error = %err, "Run aborted");
        self.activity.record(
            ActivityKind::RunAborted,
            Some(phase),
            Some(self.failure_count(phase) + 1),
            &err.to_string(),
        );
    }

    /// Bring the state machine in line with the checkpoint before the first phase.
    fn sync_state(&mut self, target: Phase) -> Result<(), PipelineError> {
        let current = self.state.current();
        if current == target {
            return Ok(());
        }
        if self.state.can_transition(target) {
            return self.state.transition(target, "resume from checkpoint");
        }
        info!(from = %current, to = %target, "Realigning state with checkpoint");
        if !self.state.rollback_to(target, "resume from checkpoint")? {
            self.state.force_transition(target, "resume from checkpoint")?;
        }
        Ok(())
    }

    /// Run one phase until it succeeds, is skipped, or recovery rolls back.
    /// Returns the phase to run next.
    async fn run_phase(
        &mut self,
        phase: Phase,
        inputs: &PhaseInputs,
        checkpoint: &mut PipelineCheckpoint,
    ) -> Result<Phase, PipelineError> {
        if checkpoint.is_completed(phase) {
            debug!(phase = %phase, "Already completed, skipping");
            return Ok(phase.next().unwrap_or(Phase::Completed));
        }

        notify(self.progress.as_ref(), phase.key(), phase_start_percent(phase), None);

        if phase.is_skippable() {
            let requirements = self.stack_requirements(checkpoint);
            if !requirements.requires(phase) {
                info!(phase = %phase, "Not required by the tech stack, skipping");
                self.activity.record(
                    ActivityKind::PhaseSkipped,
                    Some(phase),
                    None,
                    "Not required by the tech stack",
                );
                checkpoint.skip(phase);
                self.save_checkpoint(checkpoint)?;
                let next = self.advance(phase)?;
                notify(
                    self.progress.as_ref(),
                    phase.key(),
                    phase_end_percent(phase),
                    Some("skipped"),
                );
                return Ok(next);
            }
        }

        self.activity
            .record(ActivityKind::PhaseStarted, Some(phase), None, phase.display_name());

        let mut assigned_worker: Option<String> = None;
        loop {
            self.check_budget(phase)?;

            let attempt = self.failure_count(phase) + 1;
            if attempt > 1 {
                notify(
                    self.progress.as_ref(),
                    phase.key(),
                    phase_start_percent(phase),
                    Some(&format!("retrying (attempt {})", attempt)),
                );
            }

            let phase_inputs = self.phase_inputs(inputs, checkpoint, assigned_worker.as_deref());
            let err = match self.attempt(phase, &phase_inputs, checkpoint).await {
                Ok(success) => {
                    self.failure_counts.insert(phase, 0);
                    checkpoint.complete(phase, success.content);
                    self.save_checkpoint(checkpoint)?;
                    // `attempt` counts phase attempts; executor retries are inside one.
                    self.activity.record(
                        ActivityKind::PhaseCompleted,
                        Some(phase),
                        Some(attempt),
                        &format!(
                            "{} (executor attempt {})",
                            phase.display_name(),
                            success.executor_attempt
                        ),
                    );
                    let next = self.advance(phase)?;
                    notify(self.progress.as_ref(), phase.key(), phase_end_percent(phase), None);
                    return Ok(next);
                }
                Err(err) => err,
            };

            let (kind, message) = match err {
                AttemptError::Failed { kind, message } => (kind, message),
                AttemptError::Quota(message) => {
                    error!(phase = %phase, "Quota exhausted, stopping run");
                    self.activity
                        .record(ActivityKind::QuotaExhausted, Some(phase), Some(attempt), &message);
                    return Err(PipelineError::QuotaExhausted { phase, message });
                }
                AttemptError::Fatal(e) => return Err(e),
            };

            let count = attempt;
            self.failure_counts.insert(phase, count);
            warn!(phase = %phase, attempt = count, kind = %kind, error = %message, "Phase attempt failed");
            self.activity
                .record(ActivityKind::Failure, Some(phase), Some(count), &message);

            let mut context = ErrorContext::new(kind, phase, message.clone(), count);
            if let Some(target) = phase.predecessor() {
                context = context.with_rollback_target(target);
            }
            let verdict = self.recovery.decide(&context);
            self.activity
                .record(ActivityKind::Recovery, Some(phase), Some(count), &verdict.reason);

            if verdict.retry {
                if count < self.settings.max_phase_attempts.max(1) {
                    if verdict.reassign && self.settings.apply_reassignment {
                        assigned_worker = verdict.alternative_worker.clone();
                    }
                    continue;
                }
                return Err(self.mark_failed(phase, count, message));
            }

            if verdict.rollback
                && let Some(target) = verdict.rollback_target
            {
                if self.rollbacks >= self.settings.max_rollbacks {
                    warn!(phase = %phase, rollbacks = self.rollbacks, "Rollback limit reached");
                    return Err(self.mark_failed(
                        phase,
                        count,
                        format!("{} (rollback limit of {} reached)", message, self.settings.max_rollbacks),
                    ));
                }
                if self.state.rollback_to(target, &verdict.reason)? {
                    self.rollbacks += 1;
                    checkpoint.rewind(target);
                    self.save_checkpoint(checkpoint)?;
                    self.activity.record(
                        ActivityKind::Rollback,
                        Some(phase),
                        Some(count),
                        &format!("Rolled back to {}", target),
                    );
                    return Ok(target);
                }
            }

            return Err(self.mark_failed(phase, count, message));
        }
    }

    /// One budgeted, retried execution of `phase` followed by validation.
    async fn attempt(
        &mut self,
        phase: Phase,
        inputs: &PhaseInputs,
        checkpoint: &PipelineCheckpoint,
    ) -> Result<PhaseSuccess, AttemptError> {
        let executor = self
            .executors
            .get(&phase)
            .cloned()
            .ok_or(AttemptError::Fatal(PipelineError::MissingExecutor { phase }))?;
        let workspace = self.settings.workspace.clone();
        let activity = &self.activity;
        let progress = Arc::clone(&self.progress);
        let mut executor_attempt = 0;

        let outcome = self
            .retry
            .execute_observed(
                phase.key(),
                self.settings.max_attempts,
                self.settings.default_wait,
                |attempt, failure, wait| {
                    activity.record(
                        ActivityKind::Retry,
                        Some(phase),
                        Some(attempt),
                        &format!(
                            "Executor attempt {} failed ({}), retrying in {}s: {}",
                            attempt,
                            failure.kind,
                            wait.as_secs(),
                            failure.message
                        ),
                    );
                },
                |attempt| {
                    executor_attempt = attempt;
                    if attempt > 1 {
                        notify(
                            progress.as_ref(),
                            phase.key(),
                            phase_start_percent(phase),
                            Some("retrying after transient failure"),
                        );
                    }
                    let executor = Arc::clone(&executor);
                    let workspace = workspace.clone();
                    async move { executor.execute(phase, inputs, &workspace).await }
                },
            )
            .await;

        let output = match outcome {
            Ok(output) => output,
            Err(RetryError::QuotaExhausted { message, .. }) => {
                return Err(AttemptError::Quota(message));
            }
            Err(RetryError::Checkpoint(e)) => {
                return Err(AttemptError::Fatal(PipelineError::Persistence(e)));
            }
            Err(e) => {
                let kind = match e.kind() {
                    Some(k) if k.is_retryable() => ErrorKind::Transient,
                    _ => ErrorKind::Execution,
                };
                return Err(AttemptError::Failed {
                    kind,
                    message: e.to_string(),
                });
            }
        };

        let worker = executor.worker().to_string();
        let cost = self
            .governor
            .cost(&worker, output.usage.input_units, output.usage.output_units);
        if let Some(totals) = self.governor.record(&self.settings.project_id, &worker, cost) {
            debug!(
                phase = %phase,
                worker = %worker,
                cost,
                project_total = totals.project_total,
                "Recorded phase cost"
            );
        }

        let content = resolve_artifact(phase, &self.settings.workspace, &output.result)?;
        self.validate_postconditions(phase, checkpoint)?;
        Ok(PhaseSuccess {
            content,
            executor_attempt,
        })
    }

    /// Phase-specific checks on the files left in the workspace.
    fn validate_postconditions(
        &self,
        phase: Phase,
        checkpoint: &PipelineCheckpoint,
    ) -> Result<(), ValidationError> {
        if !matches!(phase, Phase::Development | Phase::Frontend) {
            return Ok(());
        }

        let files = scan_workspace(&self.settings.workspace);
        if phase == Phase::Development {
            check_development(&files)?;
        } else {
            check_frontend(&files)?;
        }

        let tech_stack = checkpoint
            .results
            .get(Phase::TechArchitect.result_key())
            .map(String::as_str)
            .unwrap_or_default();
        let expected = self.file_validator.expected_files(phase, tech_stack);
        let report = self.file_validator.validate(&expected, &files);
        if !report.valid {
            return Err(ValidationError::MissingFiles {
                phase,
                missing: report.missing_files,
            });
        }
        Ok(())
    }

    fn check_budget(&mut self, phase: Phase) -> Result<(), PipelineError> {
        let project_id = self.settings.project_id.clone();
        let decision = self.governor.check(&project_id);
        if decision.degraded {
            debug!(phase = %phase, state = ?self.governor.state(), "Budget check degraded, allowing");
            return Ok(());
        }
        let Some(status) = decision.status else {
            return Ok(());
        };

        if !decision.allowed {
            let (spent, limit) = status
                .exceeded_amounts()
                .unwrap_or((status.project_spent, status.project_limit));
            error!(phase = %phase, spent, limit, "Budget exceeded, stopping run");
            self.activity.record(
                ActivityKind::BudgetDenied,
                Some(phase),
                None,
                &format!("Spent ${:.2} of ${:.2}", spent, limit),
            );
            return Err(PipelineError::BudgetExceeded {
                project_id,
                spent,
                limit,
            });
        }

        if status.project_warning || status.hourly_warning {
            warn!(
                phase = %phase,
                project_spent = status.project_spent,
                hourly_spent = status.hourly_spent,
                "Approaching budget limit"
            );
            self.activity.record(
                ActivityKind::BudgetWarning,
                Some(phase),
                None,
                &format!(
                    "Project ${:.2}/${:.2}, hour ${:.2}/${:.2}",
                    status.project_spent,
                    status.project_limit,
                    status.hourly_spent,
                    status.hourly_limit
                ),
            );
        }
        Ok(())
    }

    fn stack_requirements(&self, checkpoint: &PipelineCheckpoint) -> StackRequirements {
        match checkpoint.results.get(Phase::TechArchitect.result_key()) {
            Some(stack) => self.stack_classifier.classify(stack),
            None => {
                debug!("No tech stack result, requiring every phase");
                StackRequirements::full()
            }
        }
    }

    fn phase_inputs(
        &self,
        inputs: &PhaseInputs,
        checkpoint: &PipelineCheckpoint,
        assigned_worker: Option<&str>,
    ) -> PhaseInputs {
        let mut merged = inputs.clone();
        merged.extend(
            checkpoint
                .results
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if let Some(worker) = assigned_worker {
            merged.insert(ASSIGNED_WORKER_KEY.to_string(), worker.to_string());
        }
        merged
    }

    /// Move the state machine past `phase`.
    fn advance(&mut self, phase: Phase) -> Result<Phase, PipelineError> {
        let next = phase.next().unwrap_or(Phase::Completed);
        self.state
            .transition(next, &format!("{} completed", phase.display_name()))?;
        self.activity.record(
            ActivityKind::Transition,
            Some(phase),
            None,
            &format!("{} -> {}", phase, next),
        );
        Ok(next)
    }

    fn save_checkpoint(&self, checkpoint: &PipelineCheckpoint) -> Result<(), PipelineError> {
        checkpoint
            .save(&self.settings.checkpoint_file())
            .map_err(PipelineError::Persistence)
    }

    /// Move to `Failed`, forcing the edge if the table blocks it.
    fn mark_failed(&mut self, phase: Phase, attempts: u32, message: String) -> PipelineError {
        error!(phase = %phase, attempts, error = %message, "Phase failed, marking run failed");
        let context = format!("{} failed: {}", phase.display_name(), message);
        let moved = if self.state.can_transition(Phase::Failed) {
            self.state.transition(Phase::Failed, &context)
        } else {
            self.state.force_transition(Phase::Failed, &context)
        };
        if let Err(e) = moved {
            warn!(error = %e, "Failed to persist failed state");
        }
        self.activity
            .record(ActivityKind::RunFailed, Some(phase), Some(attempts), &message);
        PipelineError::PhaseFailed {
            phase,
            attempts,
            message,
        }
    }

    /// Clean up persisted run state once every phase has finished.
    fn finish(
        &mut self,
        checkpoint: PipelineCheckpoint,
    ) -> Result<BTreeMap<String, String>, PipelineError> {
        if self.state.current() != Phase::Completed {
            self.sync_completed()?;
        }

        PipelineCheckpoint::delete(&self.settings.checkpoint_file())
            .map_err(PipelineError::Persistence)?;
        self.state.clear().map_err(PipelineError::Persistence)?;
        let retry_checkpoint = self.settings.retry_checkpoint_file();
        if retry_checkpoint.exists() {
            std::fs::remove_file(&retry_checkpoint)
                .map_err(|e| PipelineError::Persistence(e.into()))?;
        }

        info!(
            project_id = %self.settings.project_id,
            rollbacks = self.rollbacks,
            "Pipeline completed"
        );
        self.activity
            .record(ActivityKind::RunCompleted, None, None, "Pipeline completed");
        notify(self.progress.as_ref(), Phase::Completed.key(), 100, None);
        Ok(checkpoint.results)
    }

    /// Crash between the last checkpoint write and its transition.
    fn sync_completed(&mut self) -> Result<(), PipelineError> {
        if self.state.can_transition(Phase::Completed) {
            self.state
                .transition(Phase::Completed, "resume from checkpoint")
        } else {
            self.state
                .force_transition(Phase::Completed, "resume from checkpoint")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PhaseOutput;
    use crate::phase::PIPELINE_ORDER;
    use crate::retry::RecordingSleeper;
    use crate::retry::classify::{FailureKind, WorkerFailure};
    use crate::stack::FixedStackClassifier;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    /// Executor that returns queued results, then a default success.
    struct Scripted {
        worker: String,
        script: Mutex<Vec<Result<PhaseOutput>>>,
        calls: Mutex<Vec<PhaseInputs>>,
    }

    impl Scripted {
        fn ok() -> Arc<Self> {
            Self::with(Vec::new())
        }

        fn with(script: Vec<Result<PhaseOutput>>) -> Arc<Self> {
            Arc::new(Self {
                worker: "test".into(),
                script: Mutex::new(script.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<PhaseInputs> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PhaseExecutor for Scripted {
        fn worker(&self) -> &str {
            &self.worker
        }

        async fn execute(
            &self,
            phase: Phase,
            inputs: &PhaseInputs,
            _workspace: &Path,
        ) -> Result<PhaseOutput> {
            self.calls.lock().unwrap().push(inputs.clone());
            match self.script.lock().unwrap().pop() {
                Some(result) => result,
                None => Ok(PhaseOutput::text(format!(
                    "Detailed {} output with real content",
                    phase.display_name()
                ))),
            }
        }
    }

    fn setup() -> (TempDir, PipelineSettings) {
        let dir = tempdir().unwrap();
        let mut settings = PipelineSettings::new("shop", dir.path());
        settings.default_wait = Duration::from_secs(2);
        (dir, settings)
    }

    /// Orchestrator where only the first four phases run.
    fn planning_only(settings: PipelineSettings) -> Orchestrator {
        let mut orch = Orchestrator::new(settings)
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .with_stack_classifier(Arc::new(FixedStackClassifier(StackRequirements::new(
                true, false,
            ))));
        for phase in PIPELINE_ORDER {
            orch = orch.with_executor(phase, Scripted::ok());
        }
        orch
    }

    #[test]
    fn test_settings_paths() {
        let settings = PipelineSettings::new("shop", "/work");
        assert_eq!(
            settings.state_file(),
            PathBuf::from("/work/.conductor/runs/shop/state.json")
        );
        assert!(settings.checkpoint_file().ends_with("checkpoint.json"));
        assert!(settings.activity_log().ends_with("activity.jsonl"));
    }

    #[tokio::test]
    async fn test_missing_executor_is_fatal() {
        let (_dir, settings) = setup();
        let mut orch = Orchestrator::new(settings);
        let err = orch.run(PhaseInputs::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingExecutor { phase: Phase::Meta }));
        assert_eq!(orch.current_phase(), Phase::Meta);

        let entries = ActivityLog::read_all(orch.activity_log_path()).unwrap();
        let aborted = entries.last().unwrap();
        assert_eq!(aborted.kind, ActivityKind::RunAborted);
        assert_eq!(aborted.phase, Some(Phase::Meta));
        assert_eq!(aborted.attempt, Some(1));
        assert!(aborted.message.contains("No executor registered"));
    }

    #[tokio::test]
    async fn test_cancel_before_first_phase() {
        let (_dir, settings) = setup();
        let mut orch = planning_only(settings);
        orch.cancel_flag().store(true, Ordering::SeqCst);
        let err = orch.run(PhaseInputs::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { phase: Phase::Meta }));
        assert!(err.is_retryable_later());
    }

    #[tokio::test]
    async fn test_results_flow_into_later_inputs() {
        let (dir, settings) = setup();
        let designer = Scripted::ok();
        let mut orch = planning_only(settings).with_executor(Phase::Designer, designer.clone());

        // Development is required; satisfy its postconditions up front.
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("src/main_test.rs"), "").unwrap();

        let mut inputs = PhaseInputs::new();
        inputs.insert("idea".into(), "a todo app".into());
        let results = orch.run(inputs).await.unwrap();

        let seen = &designer.calls()[0];
        assert_eq!(seen.get("idea").map(String::as_str), Some("a todo app"));
        assert!(seen.contains_key("meta"));
        assert!(seen.contains_key("requirements"));
        assert!(!seen.contains_key("design_spec"));
        assert!(results.contains_key("tech_stack"));
        assert!(!results.contains_key("frontend"));
        assert_eq!(orch.current_phase(), Phase::Completed);
    }

    #[tokio::test]
    async fn test_status_message_result_is_a_validation_failure() {
        let (_dir, mut settings) = setup();
        settings.max_phase_attempts = 2;
        let owner = Scripted::with(vec![Ok(PhaseOutput::text("Done!"))]);
        let mut orch = planning_only(settings).with_executor(Phase::ProductOwner, owner.clone());

        let err = orch.run(PhaseInputs::new()).await.unwrap_err();

        // The second product owner attempt has real content; the run then
        // fails at development because the workspace has no source files.
        assert_eq!(owner.calls().len(), 2);
        assert_eq!(orch.failure_count(Phase::ProductOwner), 0);
        assert!(matches!(
            err,
            PipelineError::PhaseFailed {
                phase: Phase::Development,
                attempts: 2,
                ..
            }
        ));
        let history = orch.recovery().history(ErrorKind::Validation);
        assert_eq!(history[0].failed_phase, Phase::ProductOwner);
        assert!(history[0].message.contains("status message"));

        let entries = ActivityLog::read_all(orch.activity_log_path()).unwrap();
        let owner_done = entries
            .iter()
            .find(|e| e.kind == ActivityKind::PhaseCompleted && e.phase == Some(Phase::ProductOwner))
            .unwrap();
        assert_eq!(owner_done.attempt, Some(2));
    }

    #[tokio::test]
    async fn test_quota_exhaustion_stops_without_failing() {
        let (_dir, settings) = setup();
        let meta = Scripted::with(vec![Err(anyhow::Error::from(WorkerFailure::new(
            FailureKind::QuotaExhausted,
            "daily quota exceeded",
        )))]);
        let mut orch = planning_only(settings).with_executor(Phase::Meta, meta);

        let err = orch.run(PhaseInputs::new()).await.unwrap_err();
        assert!(err.is_quota_exhausted());
        assert_eq!(orch.current_phase(), Phase::Meta);
        assert_eq!(orch.failure_count(Phase::Meta), 0);
    }

    #[tokio::test]
    async fn test_meta_failure_cannot_roll_back() {
        let (_dir, settings) = setup();
        let script = (0..4)
            .map(|_| {
                Err(anyhow::Error::from(WorkerFailure::new(
                    FailureKind::Fatal,
                    "bad request",
                )))
            })
            .collect();
        let mut orch = planning_only(settings).with_executor(Phase::Meta, Scripted::with(script));

        let err = orch.run(PhaseInputs::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::PhaseFailed {
                phase: Phase::Meta,
                attempts: 4,
                ..
            }
        ));
        assert_eq!(orch.current_phase(), Phase::Failed);
        assert_eq!(orch.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_reassignment_passes_alternative_worker() {
        let (_dir, mut settings) = setup();
        settings.apply_reassignment = true;
        let fail = || {
            Err(anyhow::Error::from(WorkerFailure::new(
                FailureKind::Fatal,
                "worker crashed",
            )))
        };
        let owner = Scripted::with(vec![fail(), fail()]);
        let mut orch = planning_only(settings).with_executor(Phase::ProductOwner, owner.clone());
        let _ = orch.run(PhaseInputs::new()).await;

        let calls = owner.calls();
        assert!(calls.len() >= 3);
        assert!(!calls[1].contains_key(ASSIGNED_WORKER_KEY));
        assert_eq!(
            calls[2].get(ASSIGNED_WORKER_KEY).map(String::as_str),
            Some("analyst")
        );
        assert_eq!(orch.failure_count(Phase::ProductOwner), 0);
    }
}
