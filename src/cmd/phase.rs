//! Status, reset, and activity log commands.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::Cli;

pub fn cmd_status(project_dir: &Path, cli: &Cli) -> Result<()> {
    use conductor::audit::ActivityLog;
    use conductor::config::Config;
    use conductor::init::is_initialized;
    use conductor::orchestrator::{PipelineCheckpoint, StateFile};
    use conductor::phase::PIPELINE_ORDER;
    use conductor::retry::RetryCheckpoint;

    println!();
    println!("Conductor Project Status");
    println!("========================");
    println!();

    if !is_initialized(project_dir) {
        println!("Project: Not initialized");
        println!();
        println!("Run 'conductor init' to initialize the project.");
        println!();
        return Ok(());
    }

    let config = Config::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.project_id.clone())?;
    println!("Project: {}", style(&config.project_id).cyan());

    match StateFile::load(&config.state_file())? {
        Some(state) => println!(
            "Phase:   {} (since {})",
            style(state.current_phase).yellow(),
            state.timestamp.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Phase:   Not started"),
    }

    if let Some(checkpoint) = PipelineCheckpoint::load(&config.checkpoint_file())? {
        println!();
        println!("Checkpoint (next phase: {}):", checkpoint.next_phase);
        for phase in PIPELINE_ORDER {
            let mark = if checkpoint.skipped.contains(&phase) {
                style("skipped").dim()
            } else if checkpoint.is_completed(phase) {
                style("done").green()
            } else {
                style("pending").dim()
            };
            println!("  {:<16} {}", phase.key(), mark);
        }
    }

    if let Some(retry) = RetryCheckpoint::load(&config.retry_checkpoint_file())? {
        println!();
        println!(
            "Retry in progress: {} attempt {} ({})",
            retry.operation_name, retry.attempt, retry.last_error
        );
    }

    let recent = ActivityLog::tail(&config.activity_log(), 5)?;
    if !recent.is_empty() {
        println!();
        println!("Recent activity:");
        for entry in recent {
            print_entry(&entry);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, cli: &Cli, force: bool) -> Result<()> {
    use conductor::config::Config;
    use conductor::orchestrator::PipelineCheckpoint;
    use dialoguer::Confirm;

    let config = Config::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.project_id.clone())?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "This will discard all progress for '{}'. Are you sure?",
                config.project_id
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    PipelineCheckpoint::delete(&config.checkpoint_file())?;
    for file in [config.state_file(), config.retry_checkpoint_file()] {
        if file.exists() {
            std::fs::remove_file(&file)?;
        }
    }

    println!("Reset complete (activity log kept at {})", config.activity_log().display());
    Ok(())
}

pub fn cmd_log(project_dir: &Path, cli: &Cli, limit: usize) -> Result<()> {
    use conductor::audit::ActivityLog;
    use conductor::config::Config;

    let config = Config::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.project_id.clone())?;
    let entries = ActivityLog::tail(&config.activity_log(), limit)?;
    if entries.is_empty() {
        println!("No activity recorded for '{}'.", config.project_id);
        return Ok(());
    }
    for entry in entries {
        print_entry(&entry);
    }
    Ok(())
}

fn print_entry(entry: &conductor::audit::ActivityEntry) {
    use conductor::audit::ActivityKind;

    let kind = match entry.kind {
        ActivityKind::Failure
        | ActivityKind::RunFailed
        | ActivityKind::RunAborted
        | ActivityKind::BudgetDenied => {
            style(entry.kind.to_string()).red()
        }
        ActivityKind::Retry
        | ActivityKind::Rollback
        | ActivityKind::BudgetWarning
        | ActivityKind::QuotaExhausted
        | ActivityKind::Cancelled => style(entry.kind.to_string()).yellow(),
        ActivityKind::PhaseCompleted | ActivityKind::RunCompleted => {
            style(entry.kind.to_string()).green()
        }
        _ => style(entry.kind.to_string()).dim(),
    };
    let phase = entry.phase.map(|p| p.to_string()).unwrap_or_default();
    let attempt = entry
        .attempt
        .map(|a| format!("#{}", a))
        .unwrap_or_default();
    println!(
        "  {} {:<16} {:<15} {:<3} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        kind,
        phase,
        attempt,
        entry.message
    );
}
