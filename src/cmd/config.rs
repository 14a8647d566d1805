//! Configuration view and validation commands: `conductor config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use conductor::config::{CONDUCTOR_DIR, CONFIG_FILE, Config, ConductorToml};

    let conductor_dir = project_dir.join(CONDUCTOR_DIR);
    let config_path = conductor_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Conductor Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No conductor.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // Effective values include environment overrides.
            let config = Config::new(project_dir.to_path_buf())?;
            let toml = &config.toml;
            println!("[project]");
            println!("  id = \"{}\"", config.project_id);
            println!();
            println!("[retry]");
            println!("  max_attempts = {}", toml.retry.max_attempts);
            println!("  default_wait_secs = {}", toml.retry.default_wait_secs);
            println!("  max_phase_attempts = {}", toml.retry.max_phase_attempts);
            println!();
            println!("[recovery]");
            println!("  rollback_threshold = {}", toml.recovery.rollback_threshold);
            println!("  reassign_threshold = {}", toml.recovery.reassign_threshold);
            println!("  max_rollbacks = {}", toml.recovery.max_rollbacks);
            println!("  apply_reassignment = {}", toml.recovery.apply_reassignment);
            println!();
            println!("[budget]");
            println!("  project_limit = {:.2}", toml.budget.project_limit);
            println!("  hourly_limit = {:.2}", toml.budget.hourly_limit);
            println!("  alert_threshold = {}", toml.budget.alert_threshold);
            println!();

            if !toml.pricing.is_empty() {
                println!("[pricing]");
                for (worker, price) in &toml.pricing {
                    println!(
                        "  {} = {{ input_per_million = {}, output_per_million = {} }}",
                        worker, price.input_per_million, price.output_per_million
                    );
                }
                println!();
            }

            println!("[executors]");
            if toml.executors.is_empty() {
                println!("  (none)");
            }
            for (phase, spec) in &toml.executors {
                println!(
                    "  {} = \"{} {}\" (worker: {}, timeout: {}s)",
                    phase,
                    spec.command,
                    spec.args.join(" "),
                    spec.worker,
                    spec.timeout_secs
                );
            }
            println!();

            if let Some(stack) = toml.stack_override() {
                println!("[stack]");
                println!("  backend_required = {}", stack.backend_required());
                println!("  frontend_required = {}", stack.frontend_required());
                println!();
            }

            if !config_path.exists() {
                println!("Run 'conductor config init' to create a conductor.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = Config::new(project_dir.to_path_buf())?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("conductor.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !conductor_dir.exists() {
                std::fs::create_dir_all(&conductor_dir)?;
            }
            std::fs::write(&config_path, ConductorToml::template())?;

            println!("Created conductor.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [retry] and [recovery] limits");
            println!("  - [budget] project and hourly limits");
            println!("  - [executors.<phase>] commands for each phase");
            println!();
        }
    }

    Ok(())
}
