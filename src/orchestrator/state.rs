//! Phase state machine with a persisted current-state file.
//!
//! The machine owns the current phase. Every successful transition
//! (validated, forced or rollback) rewrites `state.json` so a restarted process
//! resumes from the last known phase. Transition history is kept in memory
//! only, for the lifetime of the process.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::{PipelineError, TransitionError};
use crate::phase::{Phase, ROLLBACK_TARGETS};

/// On-disk shape of the state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub current_phase: Phase,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
}

impl StateFile {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: StateFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
        Ok(Some(state))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;
        Ok(())
    }
}

/// One entry of the in-memory transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub timestamp: DateTime<Utc>,
    pub context: String,
}

pub struct PhaseStateMachine {
    project_id: String,
    state_file: PathBuf,
    current: Phase,
    history: Vec<TransitionRecord>,
}

impl PhaseStateMachine {
    /// Open the state machine for a project, resuming from `state_file` if present.
    ///
    /// An unreadable state file is logged and ignored; the machine then starts at `Meta`.
    pub fn load(state_file: PathBuf, project_id: &str) -> Self {
        let current = match StateFile::load(&state_file) {
            Ok(Some(saved)) => {
                if saved.project_id != project_id {
                    warn!(
                        saved = %saved.project_id,
                        project_id,
                        "State file belongs to a different project id, resuming anyway"
                    );
                }
                info!(phase = %saved.current_phase, project_id, "Resumed phase from state file");
                saved.current_phase
            }
            Ok(None) => Phase::Meta,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Ignoring unreadable state file");
                Phase::Meta
            }
        };

        Self {
            project_id: project_id.to_string(),
            state_file,
            current,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn can_transition(&self, to: Phase) -> bool {
        self.current.can_transition_to(to)
    }

    /// Move along an edge of the static transition table.
    ///
    /// Leaves the current phase untouched and returns `InvalidTransition`
    /// if the edge is not in the table.
    pub fn transition(&mut self, to: Phase, context: &str) -> Result<(), PipelineError> {
        if !self.can_transition(to) {
            return Err(TransitionError {
                from: self.current,
                to,
            }
            .into());
        }
        info!(from = %self.current, to = %to, context, "Phase transition");
        self.apply(to, context)
    }

    /// Move to `to` without consulting the transition table.
    ///
    /// Only used to mark a run `Failed` when the normal edge is blocked.
    pub fn force_transition(&mut self, to: Phase, context: &str) -> Result<(), PipelineError> {
        warn!(from = %self.current, to = %to, context, "Forced phase transition");
        self.apply(to, context)
    }

    /// Roll back to an earlier working phase through the `Rollback` state.
    ///
    /// Returns `Ok(false)` without changing state if `target` is not a
    /// working phase.
    pub fn rollback_to(&mut self, target: Phase, context: &str) -> Result<bool, PipelineError> {
        if !ROLLBACK_TARGETS.contains(&target) {
            warn!(from = %self.current, target = %target, "Rollback target not allowed");
            return Ok(false);
        }
        info!(from = %self.current, target = %target, context, "Rolling back");
        if self.current != Phase::Rollback {
            self.apply(Phase::Rollback, context)?;
        }
        self.apply(target, context)?;
        Ok(true)
    }

    /// Remove the persisted state file.
    pub fn clear(&self) -> Result<()> {
        if self.state_file.exists() {
            fs::remove_file(&self.state_file).with_context(|| {
                format!("Failed to remove state file: {}", self.state_file.display())
            })?;
        }
        Ok(())
    }

    fn apply(&mut self, to: Phase, context: &str) -> Result<(), PipelineError> {
        let record = TransitionRecord {
            from_phase: self.current,
            to_phase: to,
            timestamp: Utc::now(),
            context: context.to_string(),
        };
        self.current = to;
        self.history.push(record);

        let snapshot = StateFile {
            current_phase: to,
            project_id: self.project_id.clone(),
            timestamp: Utc::now(),
        };
        snapshot
            .save(&self.state_file)
            .map_err(PipelineError::Persistence)?;
        debug!(phase = %to, file = %self.state_file.display(), "State persisted");
        Ok(())
    }
}
