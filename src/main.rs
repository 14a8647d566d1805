use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Resumable, budget-aware multi-phase build pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit console logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Project id (defaults to conductor.toml, then the directory name)
    #[arg(long, global = true)]
    pub project_id: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new conductor project
    Init,
    /// Run the pipeline, resuming from the last checkpoint
    Run {
        /// JSON file with an object of string inputs
        #[arg(long)]
        input_file: Option<PathBuf>,
        /// Extra input as KEY=VALUE (repeatable)
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,
    },
    /// Show the current phase, checkpoint and recent activity
    Status,
    /// Discard state and checkpoints so the next run starts over
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// Show the activity log
    Log {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default conductor.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // File logging only once the project has a .conductor directory.
    let log_dir = conductor::init::is_initialized(&project_dir)
        .then(|| project_dir.join(conductor::config::CONDUCTOR_DIR).join("logs"));
    let _guard = conductor::telemetry::init_tracing(cli.verbose, cli.log_json, log_dir.as_deref())?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run { input_file, inputs } => {
            cmd::cmd_run(&cli, project_dir, input_file.as_deref(), inputs).await?;
        }
        Commands::Status => cmd::cmd_status(&project_dir, &cli)?,
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, &cli, *force)?,
        Commands::Log { limit } => cmd::cmd_log(&project_dir, &cli, *limit)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
