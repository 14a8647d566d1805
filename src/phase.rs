//! Pipeline phase definitions for the conductor orchestrator.
//!
//! This module provides:
//! - `Phase` enum identifying every pipeline stage, including the terminal
//!   and transitional states
//! - The static forward transition table consulted by the state machine
//! - Fixed lookup tables: predecessor (rollback fallback), alternative worker
//!   (reassignment advice), artifact file name and result key per phase

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// A pipeline phase.
///
/// The six working phases run in the order given by [`PIPELINE_ORDER`].
/// `Completed` and `Failed` are terminal; `Rollback` is the transitional state
/// the machine passes through when recovering to an earlier phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Meta,
    ProductOwner,
    Designer,
    TechArchitect,
    Development,
    Frontend,
    Completed,
    Failed,
    Rollback,
}

/// The working phases in execution order.
pub const PIPELINE_ORDER: [Phase; 6] = [
    Phase::Meta,
    Phase::ProductOwner,
    Phase::Designer,
    Phase::TechArchitect,
    Phase::Development,
    Phase::Frontend,
];

/// Phases a rollback may target.
pub const ROLLBACK_TARGETS: [Phase; 6] = PIPELINE_ORDER;

impl Phase {
    /// Stable snake_case identifier used in files, logs and config keys.
    pub fn key(&self) -> &'static str {
        match self {
            Phase::Meta => "meta",
            Phase::ProductOwner => "product_owner",
            Phase::Designer => "designer",
            Phase::TechArchitect => "tech_architect",
            Phase::Development => "development",
            Phase::Frontend => "frontend",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Rollback => "rollback",
        }
    }

    /// Human-readable name for progress output.
    pub fn display_name(&self) -> &'static str {
        match self {
            Phase::Meta => "Project planning",
            Phase::ProductOwner => "Requirements",
            Phase::Designer => "Design specification",
            Phase::TechArchitect => "Technical architecture",
            Phase::Development => "Backend development",
            Phase::Frontend => "Frontend development",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
            Phase::Rollback => "Rolling back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// True for the six phases that perform work.
    pub fn is_working(&self) -> bool {
        PIPELINE_ORDER.contains(self)
    }

    /// Position in [`PIPELINE_ORDER`], `None` for non-working phases.
    pub fn index(&self) -> Option<usize> {
        PIPELINE_ORDER.iter().position(|p| p == self)
    }

    /// The phase that follows this one on success.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Frontend => Some(Phase::Completed),
            p => p.index().and_then(|i| PIPELINE_ORDER.get(i + 1).copied()),
        }
    }

    /// Static forward transition table.
    ///
    /// Rollback back-edges are deliberately absent; they go through
    /// `PhaseStateMachine::rollback_to` instead.
    pub fn allowed_transitions(&self) -> &'static [Phase] {
        match self {
            Phase::Meta => &[Phase::ProductOwner, Phase::Failed],
            Phase::ProductOwner => &[Phase::Designer, Phase::Failed, Phase::Rollback],
            Phase::Designer => &[Phase::TechArchitect, Phase::Failed, Phase::Rollback],
            Phase::TechArchitect => &[Phase::Development, Phase::Failed, Phase::Rollback],
            Phase::Development => &[Phase::Frontend, Phase::Failed, Phase::Rollback],
            Phase::Frontend => &[Phase::Completed, Phase::Failed, Phase::Rollback],
            Phase::Rollback => &[
                Phase::Meta,
                Phase::ProductOwner,
                Phase::Designer,
                Phase::TechArchitect,
                Phase::Development,
                Phase::Frontend,
                Phase::Failed,
            ],
            Phase::Completed => &[Phase::Failed],
            Phase::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, to: Phase) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// One phase earlier; the fallback rollback target.
    pub fn predecessor(&self) -> Option<Phase> {
        match self {
            Phase::ProductOwner => Some(Phase::Meta),
            Phase::Designer => Some(Phase::ProductOwner),
            Phase::TechArchitect => Some(Phase::Designer),
            Phase::Development => Some(Phase::TechArchitect),
            Phase::Frontend => Some(Phase::Development),
            _ => None,
        }
    }

    /// Worker suggested when the primary worker keeps failing.
    pub fn alternative_worker(&self) -> Option<&'static str> {
        match self {
            Phase::Meta => Some("planner-fallback"),
            Phase::ProductOwner => Some("analyst"),
            Phase::Designer => Some("ux-reviewer"),
            Phase::TechArchitect => Some("systems-architect"),
            Phase::Development => Some("senior-developer"),
            Phase::Frontend => Some("ui-specialist"),
            _ => None,
        }
    }

    /// Artifact file the executor is expected to write, relative to the workspace.
    pub fn artifact_file(&self) -> Option<&'static str> {
        match self {
            Phase::ProductOwner => Some("requirements.md"),
            Phase::Designer => Some("design_spec.md"),
            Phase::TechArchitect => Some("tech_stack.md"),
            _ => None,
        }
    }

    /// Key under which this phase's result is stored in the accumulated results.
    pub fn result_key(&self) -> &'static str {
        match self {
            Phase::Meta => "meta",
            Phase::ProductOwner => "requirements",
            Phase::Designer => "design_spec",
            Phase::TechArchitect => "tech_stack",
            Phase::Development => "development",
            Phase::Frontend => "frontend",
            other => other.key(),
        }
    }

    /// Development and frontend may be skipped by the stack classifier.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Phase::Development | Phase::Frontend)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        let phase = match normalized.as_str() {
            "meta" => Phase::Meta,
            "product_owner" => Phase::ProductOwner,
            "designer" => Phase::Designer,
            "tech_architect" => Phase::TechArchitect,
            "development" => Phase::Development,
            "frontend" => Phase::Frontend,
            "completed" => Phase::Completed,
            "failed" => Phase::Failed,
            "rollback" => Phase::Rollback,
            _ => bail!(
                "Invalid phase '{}'. Valid values: meta, product_owner, designer, tech_architect, development, frontend",
                s
            ),
        };
        Ok(phase)
    }
}

/// Overall progress percentage at the start of a working phase.
pub fn phase_start_percent(phase: Phase) -> u8 {
    phase
        .index()
        .map(|i| (i * 100 / PIPELINE_ORDER.len()) as u8)
        .unwrap_or(100)
}

/// Overall progress percentage once a working phase has finished.
pub fn phase_end_percent(phase: Phase) -> u8 {
    phase
        .index()
        .map(|i| ((i + 1) * 100 / PIPELINE_ORDER.len()) as u8)
        .unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Phase; 9] = [
        Phase::Meta,
        Phase::ProductOwner,
        Phase::Designer,
        Phase::TechArchitect,
        Phase::Development,
        Phase::Frontend,
        Phase::Completed,
        Phase::Failed,
        Phase::Rollback,
    ];

    #[test]
    fn test_pipeline_order_is_linear_forward_chain() {
        for pair in PIPELINE_ORDER.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} should advance to {}",
                pair[0],
                pair[1]
            );
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(Phase::Frontend.next(), Some(Phase::Completed));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Completed.is_terminal());
        assert!(Phase::Failed.is_terminal());
        for phase in PIPELINE_ORDER {
            assert!(!phase.is_terminal());
        }
        assert!(!Phase::Rollback.is_terminal());
    }

    #[test]
    fn test_failed_has_no_outgoing_edges() {
        assert!(Phase::Failed.allowed_transitions().is_empty());
    }

    #[test]
    fn test_completed_only_moves_to_failed() {
        assert_eq!(Phase::Completed.allowed_transitions(), &[Phase::Failed]);
    }

    #[test]
    fn test_forward_table_has_no_back_edges() {
        for from in PIPELINE_ORDER {
            let from_idx = from.index().unwrap();
            for to in from.allowed_transitions() {
                if let Some(to_idx) = to.index() {
                    assert!(to_idx > from_idx, "{} -> {} is a back edge", from, to);
                }
            }
        }
    }

    #[test]
    fn test_predecessor_map() {
        assert_eq!(Phase::Meta.predecessor(), None);
        assert_eq!(Phase::ProductOwner.predecessor(), Some(Phase::Meta));
        assert_eq!(Phase::Frontend.predecessor(), Some(Phase::Development));
        assert_eq!(Phase::Completed.predecessor(), None);
    }

    #[test]
    fn test_every_working_phase_has_alternative_worker() {
        for phase in PIPELINE_ORDER {
            assert!(phase.alternative_worker().is_some(), "{}", phase);
        }
        assert!(Phase::Failed.alternative_worker().is_none());
    }

    #[test]
    fn test_artifact_files() {
        assert_eq!(Phase::ProductOwner.artifact_file(), Some("requirements.md"));
        assert_eq!(Phase::Designer.artifact_file(), Some("design_spec.md"));
        assert_eq!(Phase::TechArchitect.artifact_file(), Some("tech_stack.md"));
        assert_eq!(Phase::Development.artifact_file(), None);
    }

    #[test]
    fn test_key_round_trips_through_from_str() {
        for phase in ALL {
            let parsed: Phase = phase.key().parse().unwrap();
            assert_eq!(parsed, phase);
        }
        let dashed: Phase = "tech-architect".parse().unwrap();
        assert_eq!(dashed, Phase::TechArchitect);
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        let err = "qa".parse::<Phase>().unwrap_err();
        assert!(err.to_string().contains("Invalid phase 'qa'"));
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Phase::TechArchitect).unwrap();
        assert_eq!(json, "\"tech_architect\"");
    }

    #[test]
    fn test_progress_percentages() {
        assert_eq!(phase_start_percent(Phase::Meta), 0);
        assert_eq!(phase_end_percent(Phase::Meta), 16);
        assert_eq!(phase_end_percent(Phase::Frontend), 100);
        assert_eq!(phase_start_percent(Phase::Completed), 100);
    }
}
