//! Configuration for conductor, read from `.conductor/conductor.toml`.
//!
//! Layered: file → environment → CLI. Every section is optional and falls
//! back to defaults.
//!
//! ```toml
//! [project]
//! id = "my-app"
//!
//! [retry]
//! max_attempts = 5
//! default_wait_secs = 60
//! max_phase_attempts = 4
//!
//! [recovery]
//! rollback_threshold = 3
//! reassign_threshold = 1
//! max_rollbacks = 2
//!
//! [budget]
//! project_limit = 25.0
//! hourly_limit = 5.0
//!
//! [pricing.claude]
//! input_per_million = 3.0
//! output_per_million = 15.0
//!
//! [executors.meta]
//! command = "my-agent"
//! args = ["--phase", "meta"]
//! worker = "claude"
//!
//! [stack]
//! backend_required = true
//! frontend_required = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::budget::{BudgetLimits, CostLedger, GovernorConfig, Pricing};
use crate::executor::CommandSpec;
use crate::orchestrator::PipelineSettings;
use crate::orchestrator::runner::{
    ACTIVITY_LOG_FILE, CHECKPOINT_FILE, RETRY_CHECKPOINT_FILE, STATE_FILE,
};
use crate::phase::{PIPELINE_ORDER, Phase};
use crate::recovery::RecoveryPolicy;
use crate::stack::StackRequirements;

pub const CONDUCTOR_DIR: &str = ".conductor";
pub const CONFIG_FILE: &str = "conductor.toml";

pub const ENV_PROJECT_ID: &str = "CONDUCTOR_PROJECT_ID";
pub const ENV_PROJECT_BUDGET: &str = "CONDUCTOR_PROJECT_BUDGET";
pub const ENV_HOURLY_BUDGET: &str = "CONDUCTOR_HOURLY_BUDGET";
pub const ENV_MAX_PHASE_ATTEMPTS: &str = "CONDUCTOR_MAX_PHASE_ATTEMPTS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project id (defaults to the directory name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    /// Attempts the retry executor makes per phase call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait used when a failure carries no suggested delay
    #[serde(default = "default_wait_secs")]
    pub default_wait_secs: u64,
    /// Outer attempts per phase before the recovery engine rolls back
    #[serde(default = "default_max_phase_attempts")]
    pub max_phase_attempts: u32,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_wait_secs() -> u64 {
    60
}

fn default_max_phase_attempts() -> u32 {
    4
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            default_wait_secs: default_wait_secs(),
            max_phase_attempts: default_max_phase_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_rollback_threshold")]
    pub rollback_threshold: u32,
    #[serde(default = "default_reassign_threshold")]
    pub reassign_threshold: u32,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Rollbacks allowed per run before the run is marked failed
    #[serde(default = "default_max_rollbacks")]
    pub max_rollbacks: u32,
    /// Pass the suggested alternative worker to the executor
    #[serde(default)]
    pub apply_reassignment: bool,
}

fn default_rollback_threshold() -> u32 {
    3
}

fn default_reassign_threshold() -> u32 {
    1
}

fn default_history_size() -> usize {
    5
}

fn default_max_rollbacks() -> u32 {
    2
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            rollback_threshold: default_rollback_threshold(),
            reassign_threshold: default_reassign_threshold(),
            history_size: default_history_size(),
            max_rollbacks: default_max_rollbacks(),
            apply_reassignment: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSection {
    #[serde(default = "default_project_limit")]
    pub project_limit: f64,
    #[serde(default = "default_hourly_limit")]
    pub hourly_limit: f64,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_retention_hours")]
    pub hourly_retention_hours: u32,
    #[serde(default = "default_input_rate")]
    pub default_input_per_million: f64,
    #[serde(default = "default_output_rate")]
    pub default_output_per_million: f64,
}

fn default_project_limit() -> f64 {
    25.0
}

fn default_hourly_limit() -> f64 {
    5.0
}

fn default_alert_threshold() -> f64 {
    0.8
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_retention_hours() -> u32 {
    48
}

fn default_input_rate() -> f64 {
    3.0
}

fn default_output_rate() -> f64 {
    15.0
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            project_limit: default_project_limit(),
            hourly_limit: default_hourly_limit(),
            alert_threshold: default_alert_threshold(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            hourly_retention_hours: default_retention_hours(),
            default_input_per_million: default_input_rate(),
            default_output_per_million: default_output_rate(),
        }
    }
}

/// Fixed override of the stack classifier. Unset fields count as required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_required: Option<bool>,
}

/// Parsed `conductor.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub recovery: RecoverySection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub pricing: BTreeMap<String, Pricing>,
    #[serde(default)]
    pub executors: BTreeMap<String, CommandSpec>,
    #[serde(default)]
    pub stack: StackSection,
}

impl ConductorToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `.conductor/conductor.toml`, or defaults if it does not exist.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides using `lookup`. Returns warnings for
    /// values that could not be parsed.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(id) = lookup(ENV_PROJECT_ID).filter(|v| !v.trim().is_empty()) {
            self.project.id = Some(id.trim().to_string());
        }

        let mut parse_f64 = |name: &str, target: &mut f64| {
            if let Some(raw) = lookup(name) {
                match raw.trim().parse::<f64>() {
                    Ok(v) => *target = v,
                    Err(_) => warnings.push(format!("Ignoring {}={}: not a number", name, raw)),
                }
            }
        };
        parse_f64(ENV_PROJECT_BUDGET, &mut self.budget.project_limit);
        parse_f64(ENV_HOURLY_BUDGET, &mut self.budget.hourly_limit);

        if let Some(raw) = lookup(ENV_MAX_PHASE_ATTEMPTS) {
            match raw.trim().parse::<u32>() {
                Ok(v) => self.retry.max_phase_attempts = v,
                Err(_) => warnings.push(format!(
                    "Ignoring {}={}: not a positive integer",
                    ENV_MAX_PHASE_ATTEMPTS, raw
                )),
            }
        }

        warnings
    }

    /// Executor table for `phase`, keyed by the phase key.
    pub fn executor_for(&self, phase: Phase) -> Option<&CommandSpec> {
        self.executors.get(phase.key())
    }

    pub fn stack_override(&self) -> Option<StackRequirements> {
        if self.stack.backend_required.is_none() && self.stack.frontend_required.is_none() {
            return None;
        }
        Some(StackRequirements::new(
            self.stack.backend_required.unwrap_or(true),
            self.stack.frontend_required.unwrap_or(true),
        ))
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            rollback_threshold: self.recovery.rollback_threshold,
            reassign_threshold: self.recovery.reassign_threshold,
            history_size: self.recovery.history_size,
        }
    }

    pub fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits {
            project_limit: self.budget.project_limit,
            hourly_limit: self.budget.hourly_limit,
            alert_threshold: self.budget.alert_threshold,
        }
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            failure_threshold: self.budget.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(self.budget.recovery_timeout_secs),
        }
    }

    /// A fresh ledger priced and limited per this configuration.
    pub fn ledger(&self) -> CostLedger {
        let pricing: HashMap<String, Pricing> = self
            .pricing
            .iter()
            .map(|(worker, price)| (worker.clone(), *price))
            .collect();
        CostLedger::new(self.budget_limits())
            .with_pricing(pricing)
            .with_default_pricing(Pricing {
                input_per_million: self.budget.default_input_per_million,
                output_per_million: self.budget.default_output_per_million,
            })
            .with_retention_hours(self.budget.hourly_retention_hours)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(self.budget.alert_threshold > 0.0 && self.budget.alert_threshold <= 1.0) {
            warnings.push(format!(
                "budget.alert_threshold {} should be in (0, 1]",
                self.budget.alert_threshold
            ));
        }
        if self.budget.project_limit <= 0.0 {
            warnings.push("budget.project_limit must be positive; every phase will be denied".into());
        }
        if self.budget.hourly_limit <= 0.0 {
            warnings.push("budget.hourly_limit must be positive; every phase will be denied".into());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; each phase call is still attempted once".into());
        }
        if self.retry.max_phase_attempts == 0 {
            warnings.push("retry.max_phase_attempts is 0; each phase is still attempted once".into());
        }
        if self.recovery.reassign_threshold >= self.recovery.rollback_threshold {
            warnings.push(format!(
                "recovery.reassign_threshold ({}) is not below rollback_threshold ({}); reassignment will never be suggested",
                self.recovery.reassign_threshold, self.recovery.rollback_threshold
            ));
        }

        for key in self.executors.keys() {
            if key.parse::<Phase>().map(|p| !p.is_working()).unwrap_or(true) {
                warnings.push(format!("[executors.{}] does not name a pipeline phase", key));
            }
        }
        for phase in PIPELINE_ORDER {
            if self.executor_for(phase).is_none() {
                warnings.push(format!("No executor configured for phase '{}'", phase.key()));
            }
        }
        for (worker, price) in &self.pricing {
            if price.input_per_million < 0.0 || price.output_per_million < 0.0 {
                warnings.push(format!("pricing.{} has a negative rate", worker));
            }
        }

        warnings
    }

    /// Commented starter file written by `conductor init`.
    pub fn template() -> String {
        let mut out = String::from(
            "# conductor configuration\n\
             # Every section is optional; omitted values use the defaults shown.\n\n\
             [project]\n\
             # id = \"my-app\"\n\n\
             [retry]\n\
             max_attempts = 5\n\
             default_wait_secs = 60\n\
             max_phase_attempts = 4\n\n\
             [recovery]\n\
             rollback_threshold = 3\n\
             reassign_threshold = 1\n\
             history_size = 5\n\
             max_rollbacks = 2\n\
             apply_reassignment = false\n\n\
             [budget]\n\
             project_limit = 25.0\n\
             hourly_limit = 5.0\n\
             alert_threshold = 0.8\n\
             failure_threshold = 3\n\
             recovery_timeout_secs = 30\n\
             hourly_retention_hours = 48\n\n",
        );
        for phase in PIPELINE_ORDER {
            out.push_str(&format!(
                "# [executors.{key}]\n# command = \"my-agent\"\n# args = [\"--phase\", \"{key}\"]\n# worker = \"default\"\n\n",
                key = phase.key()
            ));
        }
        out
    }
}

/// Restrict a project id to characters safe in a directory name.
pub fn sanitize_project_id(raw: &str) -> String {
    let id: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let id = id.trim_matches('-').to_string();
    if id.is_empty() { "default".to_string() } else { id }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub project_id: String,
    pub verbose: bool,
    pub toml: ConductorToml,
    /// Problems found while applying environment overrides
    pub env_warnings: Vec<String>,
}

impl Config {
    /// Load configuration for `project_dir`: file, then process environment.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        Self::with_cli_args(project_dir, false, None)
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        project_id: Option<String>,
    ) -> Result<Self> {
        Self::build(project_dir, verbose, project_id, |name| std::env::var(name).ok())
    }

    fn build<F>(
        project_dir: PathBuf,
        verbose: bool,
        cli_project_id: Option<String>,
        lookup: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let conductor_dir = project_dir.join(CONDUCTOR_DIR);
        let mut toml = ConductorToml::load_or_default(&conductor_dir)?;
        let env_warnings = toml.apply_env_with(lookup);

        let raw_id = cli_project_id
            .or_else(|| toml.project.id.clone())
            .or_else(|| {
                project_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        let project_id = sanitize_project_id(&raw_id);
        debug!(project_id = %project_id, dir = %project_dir.display(), "Configuration loaded");

        Ok(Self {
            project_dir,
            conductor_dir,
            project_id,
            verbose,
            toml,
            env_warnings,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.conductor_dir.join(CONFIG_FILE)
    }

    /// Per-project directory holding state, checkpoints and the activity log.
    pub fn run_dir(&self) -> PathBuf {
        self.conductor_dir.join("runs").join(&self.project_id)
    }

    pub fn state_file(&self) -> PathBuf {
        self.run_dir().join(STATE_FILE)
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.run_dir().join(CHECKPOINT_FILE)
    }

    pub fn retry_checkpoint_file(&self) -> PathBuf {
        self.run_dir().join(RETRY_CHECKPOINT_FILE)
    }

    pub fn activity_log(&self) -> PathBuf {
        self.run_dir().join(ACTIVITY_LOG_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.conductor_dir.join("logs")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.run_dir()).context("Failed to create run directory")?;
        std::fs::create_dir_all(self.log_dir()).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            project_id: self.project_id.clone(),
            workspace: self.project_dir.clone(),
            run_dir: self.run_dir(),
            max_attempts: self.toml.retry.max_attempts,
            default_wait: Duration::from_secs(self.toml.retry.default_wait_secs),
            max_phase_attempts: self.toml.retry.max_phase_attempts,
            max_rollbacks: self.toml.recovery.max_rollbacks,
            apply_reassignment: self.toml.recovery.apply_reassignment,
            recovery: self.toml.recovery_policy(),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.env_warnings.clone();
        warnings.extend(self.toml.validate());
        warnings
    }
}
