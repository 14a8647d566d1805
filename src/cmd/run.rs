//! Pipeline execution: `conductor run`.

use anyhow::{Context, Result};
use console::style;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use conductor::executor::PhaseInputs;

use super::super::Cli;

pub fn check_run_prerequisites(project_dir: &Path) -> Result<()> {
    use conductor::init::is_initialized;

    if !is_initialized(project_dir) {
        anyhow::bail!(
            "Project not initialized. Run 'conductor init' first, then configure executors in .conductor/conductor.toml."
        );
    }
    Ok(())
}

/// Merge `--input-file` (a JSON object of strings) with `--input KEY=VALUE`
/// pairs. Command-line pairs win.
pub fn collect_inputs(input_file: Option<&Path>, pairs: &[String]) -> Result<PhaseInputs> {
    use conductor::util::parse_key_value;

    let mut inputs = PhaseInputs::new();
    if let Some(path) = input_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        let parsed: BTreeMap<String, String> = serde_json::from_str(&content).with_context(|| {
            format!(
                "Input file {} must be a JSON object of string values",
                path.display()
            )
        })?;
        inputs.extend(parsed);
    }
    for pair in pairs {
        let (key, value) = parse_key_value(pair)
            .with_context(|| format!("Invalid --input '{}': expected KEY=VALUE", pair))?;
        inputs.insert(key, value);
    }
    Ok(inputs)
}

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    input_file: Option<&Path>,
    pairs: &[String],
) -> Result<()> {
    use conductor::budget::BudgetGovernor;
    use conductor::config::Config;
    use conductor::executor::CommandExecutor;
    use conductor::orchestrator::{Orchestrator, PipelineCheckpoint};
    use conductor::phase::{PIPELINE_ORDER, Phase};
    use conductor::stack::FixedStackClassifier;
    use conductor::ui::PipelineUI;

    check_run_prerequisites(&project_dir)?;
    let inputs = collect_inputs(input_file, pairs)?;

    let config = Config::with_cli_args(project_dir, cli.verbose, cli.project_id.clone())?;
    config.ensure_directories()?;
    for warning in &config.env_warnings {
        eprintln!("{} {}", style("warning:").yellow().bold(), warning);
    }

    let settings = config.pipeline_settings();
    let governor = BudgetGovernor::new(
        Box::new(config.toml.ledger()),
        config.toml.governor_config(),
    );
    let ui = Arc::new(PipelineUI::new(cli.verbose));

    let mut orchestrator = Orchestrator::new(settings)
        .with_governor(governor)
        .with_progress(ui.clone());
    if let Some(requirements) = config.toml.stack_override() {
        orchestrator = orchestrator.with_stack_classifier(Arc::new(FixedStackClassifier(requirements)));
    }

    let mut configured = 0;
    for phase in PIPELINE_ORDER {
        match config.toml.executor_for(phase) {
            Some(spec) => {
                orchestrator =
                    orchestrator.with_executor(phase, Arc::new(CommandExecutor::new(spec.clone())));
                configured += 1;
            }
            None => eprintln!(
                "{} no executor configured for phase '{}'",
                style("warning:").yellow().bold(),
                phase
            ),
        }
    }
    if configured == 0 {
        anyhow::bail!(
            "No executors configured. Add [executors.<phase>] tables to {}",
            config.config_file().display()
        );
    }

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupt received, stopping after the current phase...");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let checkpoint = PipelineCheckpoint::load(&config.checkpoint_file()).ok().flatten();
    let start = checkpoint
        .as_ref()
        .map(|cp| cp.next_phase)
        .filter(|p| p.is_working())
        .unwrap_or(Phase::Meta);
    ui.print_header(&config.project_id, start, checkpoint.is_some());

    match orchestrator.run(inputs).await {
        Ok(results) => {
            ui.finish(None);
            println!("Results:");
            for (key, value) in &results {
                println!("  {:<14} {} chars", key, value.chars().count());
            }
            println!();
            println!(
                "Activity log: {}",
                orchestrator.activity_log_path().display()
            );
            Ok(())
        }
        Err(e) => {
            ui.finish(Some(&e));
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_collect_inputs_merges_file_and_pairs() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("inputs.json");
        std::fs::write(&file, r#"{"idea": "todo app", "audience": "teams"}"#).unwrap();

        let inputs = collect_inputs(
            Some(&file),
            &["idea=shopping list".to_string(), "tone=formal".to_string()],
        )
        .unwrap();
        assert_eq!(inputs["idea"], "shopping list");
        assert_eq!(inputs["audience"], "teams");
        assert_eq!(inputs["tone"], "formal");
    }

    #[test]
    fn test_collect_inputs_rejects_bad_pair() {
        let err = collect_inputs(None, &["novalue".to_string()]).unwrap_err();
        assert!(err.to_string().contains("KEY=VALUE"));
    }

    #[test]
    fn test_collect_inputs_rejects_non_string_values() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("inputs.json");
        std::fs::write(&file, r#"{"count": 3}"#).unwrap();
        assert!(collect_inputs(Some(&file), &[]).is_err());
    }
}
