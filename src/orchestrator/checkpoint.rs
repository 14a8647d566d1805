//! Pipeline checkpoint: accumulated phase results plus the phase to run next.
//!
//! Written after a phase's artifacts validate, so a restart resumes at
//! `next_phase` with every earlier result available as input.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::phase::{PIPELINE_ORDER, Phase};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCheckpoint {
    pub next_phase: Phase,
    /// Phase results keyed by `Phase::result_key`.
    #[serde(default)]
    pub results: BTreeMap<String, String>,
    /// Phases skipped by the stack classifier.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<Phase>,
    pub timestamp: DateTime<Utc>,
}

impl Default for PipelineCheckpoint {
    fn default() -> Self {
        Self {
            next_phase: Phase::Meta,
            results: BTreeMap::new(),
            skipped: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

impl PipelineCheckpoint {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
        let checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize checkpoint")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write checkpoint: {}", path.display()))?;
        Ok(())
    }

    pub fn delete(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove checkpoint: {}", path.display()))?;
        }
        Ok(())
    }

    /// True if `phase` finished (or was skipped) before `next_phase`.
    pub fn is_completed(&self, phase: Phase) -> bool {
        match (phase.index(), self.next_phase.index()) {
            (Some(p), Some(next)) => p < next,
            (Some(_), None) => self.next_phase == Phase::Completed,
            _ => false,
        }
    }

    /// Mark `phase` done and point the checkpoint at the phase after it.
    pub fn complete(&mut self, phase: Phase, result: String) {
        self.results.insert(phase.result_key().to_string(), result);
        self.skipped.retain(|p| *p != phase);
        self.advance_past(phase);
    }

    /// Mark `phase` skipped.
    pub fn skip(&mut self, phase: Phase) {
        self.results.remove(phase.result_key());
        if !self.skipped.contains(&phase) {
            self.skipped.push(phase);
        }
        self.advance_past(phase);
    }

    /// Point the checkpoint back at `target`, discarding results of `target`
    /// and every later phase.
    pub fn rewind(&mut self, target: Phase) {
        let Some(start) = target.index() else {
            return;
        };
        for phase in &PIPELINE_ORDER[start..] {
            self.results.remove(phase.result_key());
        }
        self.skipped
            .retain(|p| p.index().is_some_and(|i| i < start));
        self.next_phase = target;
        self.timestamp = Utc::now();
    }

    fn advance_past(&mut self, phase: Phase) {
        if let Some(next) = phase.next() {
            self.next_phase = next;
        }
        self.timestamp = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_starts_at_meta() {
        let cp = PipelineCheckpoint::default();
        assert_eq!(cp.next_phase, Phase::Meta);
        assert!(!cp.is_completed(Phase::Meta));
    }

    #[test]
    fn test_complete_advances_and_stores_result() {
        let mut cp = PipelineCheckpoint::default();
        cp.complete(Phase::Meta, "plan".into());
        cp.complete(Phase::ProductOwner, "reqs".into());
        assert_eq!(cp.next_phase, Phase::Designer);
        assert_eq!(cp.results.get("meta").map(String::as_str), Some("plan"));
        assert_eq!(cp.results.get("requirements").map(String::as_str), Some("reqs"));
        assert!(cp.is_completed(Phase::Meta));
        assert!(cp.is_completed(Phase::ProductOwner));
        assert!(!cp.is_completed(Phase::Designer));
    }

    #[test]
    fn test_frontend_completion_points_at_completed() {
        let mut cp = PipelineCheckpoint::default();
        for phase in PIPELINE_ORDER {
            cp.complete(phase, phase.key().into());
        }
        assert_eq!(cp.next_phase, Phase::Completed);
        assert!(PIPELINE_ORDER.iter().all(|p| cp.is_completed(*p)));
    }

    #[test]
    fn test_rewind_discards_later_results() {
        let mut cp = PipelineCheckpoint::default();
        for phase in &PIPELINE_ORDER[..4] {
            cp.complete(*phase, "x".into());
        }
        cp.skip(Phase::Development);
        cp.rewind(Phase::Designer);

        assert_eq!(cp.next_phase, Phase::Designer);
        assert!(cp.results.contains_key("requirements"));
        assert!(!cp.results.contains_key("design_spec"));
        assert!(!cp.results.contains_key("tech_stack"));
        assert!(cp.skipped.is_empty());
    }

    #[test]
    fn test_skip_records_phase() {
        let mut cp = PipelineCheckpoint::default();
        for phase in &PIPELINE_ORDER[..4] {
            cp.complete(*phase, "x".into());
        }
        cp.skip(Phase::Development);
        assert_eq!(cp.next_phase, Phase::Frontend);
        assert_eq!(cp.skipped, vec![Phase::Development]);
        assert!(!cp.results.contains_key("development"));
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs/demo/checkpoint.json");
        assert!(PipelineCheckpoint::load(&path).unwrap().is_none());

        let mut cp = PipelineCheckpoint::default();
        cp.complete(Phase::Meta, "plan".into());
        cp.save(&path).unwrap();

        let loaded = PipelineCheckpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded, cp);

        PipelineCheckpoint::delete(&path).unwrap();
        assert!(!path.exists());
        PipelineCheckpoint::delete(&path).unwrap();
    }
}
