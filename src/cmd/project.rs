//! Project initialization command.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use conductor::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized conductor project at {}",
            result.conductor_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .conductor/");
        println!("  ├── conductor.toml  # Configuration");
        println!("  ├── runs/           # State, checkpoints and activity logs");
        println!("  └── logs/           # Tracing logs");
        println!();
        println!("Next steps:");
        println!("  1. Add an [executors.<phase>] table for each phase to conductor.toml");
        println!("  2. Run `conductor config validate`");
        println!("  3. Run `conductor run --input idea=\"...\"`");
    } else {
        println!(
            "Conductor project already initialized at {}",
            result.conductor_dir.display()
        );
        if result.config_written {
            println!("Wrote missing conductor.toml.");
        } else {
            println!("Directory structure verified.");
        }
    }

    Ok(())
}
