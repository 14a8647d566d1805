//! `conductor init`: create the `.conductor/` directory in a project.
//!
//! ```text
//! .conductor/
//! ├── conductor.toml   # Configuration (commented defaults)
//! ├── runs/            # Per-project state, checkpoints and activity logs
//! └── logs/            # Daily rolling tracing logs
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONDUCTOR_DIR, CONFIG_FILE, ConductorToml};

/// Result of initializing a conductor project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the `.conductor` directory
    pub conductor_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
    /// Whether a config file was written (an existing one is never overwritten)
    pub config_written: bool,
}

/// Initialize a conductor project in `project_dir`.
///
/// Safe to run repeatedly: missing pieces are filled in, existing files are kept.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let conductor_dir = project_dir.join(CONDUCTOR_DIR);
    let created = !conductor_dir.exists();

    for dir in [
        conductor_dir.clone(),
        conductor_dir.join("runs"),
        conductor_dir.join("logs"),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_file = conductor_dir.join(CONFIG_FILE);
    let config_written = if config_file.exists() {
        false
    } else {
        std::fs::write(&config_file, ConductorToml::template())
            .with_context(|| format!("Failed to write {}", config_file.display()))?;
        true
    };

    Ok(InitResult {
        conductor_dir,
        created,
        config_written,
    })
}

/// Check if a project has been initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(CONDUCTOR_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_creates_structure() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));

        let result = init_project(dir.path()).unwrap();
        assert!(result.created);
        assert!(result.config_written);
        assert!(result.conductor_dir.join("runs").is_dir());
        assert!(result.conductor_dir.join("logs").is_dir());
        assert!(is_initialized(dir.path()));

        let config = ConductorToml::load(&result.conductor_dir.join(CONFIG_FILE)).unwrap();
        assert_eq!(config.retry.max_phase_attempts, 4);
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let dir = tempdir().unwrap();
        let conductor_dir = dir.path().join(CONDUCTOR_DIR);
        std::fs::create_dir_all(&conductor_dir).unwrap();
        std::fs::write(conductor_dir.join(CONFIG_FILE), "[project]\nid = \"keep\"\n").unwrap();

        let result = init_project(dir.path()).unwrap();
        assert!(!result.created);
        assert!(!result.config_written);
        let content = std::fs::read_to_string(conductor_dir.join(CONFIG_FILE)).unwrap();
        assert!(content.contains("keep"));
    }
}
