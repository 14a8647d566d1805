//! CLI tests for the `conductor` binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn conductor() -> Command {
    cargo_bin_cmd!("conductor")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_project(dir: &TempDir) {
    conductor()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        conductor()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"));
    }

    #[test]
    fn test_version() {
        conductor().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        conductor()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized conductor project"));

        assert!(dir.path().join(".conductor/conductor.toml").exists());
        assert!(dir.path().join(".conductor/runs").is_dir());
        assert!(dir.path().join(".conductor/logs").is_dir());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        conductor()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_status_uninitialized() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not initialized"));
    }

    #[test]
    fn test_status_initialized_not_started() {
        let dir = create_temp_project();
        init_project(&dir);
        conductor()
            .current_dir(dir.path())
            .args(["status", "--project-id", "shop"])
            .assert()
            .success()
            .stdout(predicate::str::contains("shop"))
            .stdout(predicate::str::contains("Not started"));
    }

    #[test]
    fn test_run_requires_init() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("conductor init"));
    }

    #[test]
    fn test_run_without_executors_fails() {
        let dir = create_temp_project();
        init_project(&dir);
        conductor()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No executors configured"));
    }

    #[test]
    fn test_run_rejects_bad_input_pair() {
        let dir = create_temp_project();
        init_project(&dir);
        conductor()
            .current_dir(dir.path())
            .args(["run", "--input", "no-equals-sign"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("KEY=VALUE"));
    }

    #[test]
    fn test_log_empty() {
        let dir = create_temp_project();
        init_project(&dir);
        conductor()
            .current_dir(dir.path())
            .arg("log")
            .assert()
            .success()
            .stdout(predicate::str::contains("No activity recorded"));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_phase_attempts = 4"))
            .stdout(predicate::str::contains("conductor config init"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created conductor.toml"));
        assert!(dir.path().join(".conductor/conductor.toml").exists());

        conductor()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_missing_executors() {
        let dir = create_temp_project();
        init_project(&dir);
        conductor()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No executor configured for phase 'meta'"));
    }

    #[test]
    fn test_config_env_override() {
        let dir = create_temp_project();
        init_project(&dir);
        conductor()
            .current_dir(dir.path())
            .env("CONDUCTOR_PROJECT_BUDGET", "99")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("project_limit = 99.00"));
    }

    #[test]
    fn test_config_show_executors() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".conductor/conductor.toml"),
            "[executors.designer]\ncommand = \"agent\"\nargs = [\"--role\", \"design\"]\nworker = \"opus\"\n",
        )
        .unwrap();
        conductor()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("designer = \"agent --role design\""))
            .stdout(predicate::str::contains("worker: opus"));
    }
}

// =============================================================================
// End-to-end run with shell executors
// =============================================================================

#[cfg(unix)]
mod pipeline_run {
    use super::*;

    fn write_config(dir: &TempDir) {
        let mut toml = String::from(
            "[project]\nid = \"demo\"\n\n[stack]\nbackend_required = true\nfrontend_required = false\n\n",
        );
        for phase in ["meta", "product_owner", "designer", "tech_architect"] {
            toml.push_str(&format!(
                "[executors.{phase}]\ncommand = \"sh\"\nargs = [\"-c\", \"echo Detailed {phase} document describing the product in depth\"]\n\n"
            ));
        }
        toml.push_str(
            "[executors.development]\ncommand = \"sh\"\nargs = [\"-c\", \"mkdir -p src tests && echo 'print(1)' > src/app.py && echo 'def test_app(): pass' > tests/test_app.py && echo Implemented the service and its tests\"]\n",
        );
        fs::write(dir.path().join(".conductor/conductor.toml"), toml).unwrap();
    }

    #[test]
    fn test_run_completes_and_cleans_up() {
        let dir = create_temp_project();
        init_project(&dir);
        write_config(&dir);

        conductor()
            .current_dir(dir.path())
            .args(["run", "--input", "idea=todo app"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Results:"))
            .stdout(predicate::str::contains("tech_stack"));

        let run_dir = dir.path().join(".conductor/runs/demo");
        assert!(!run_dir.join("state.json").exists());
        assert!(!run_dir.join("checkpoint.json").exists());
        assert!(run_dir.join("activity.jsonl").exists());

        conductor()
            .current_dir(dir.path())
            .args(["log", "--limit", "50"])
            .assert()
            .success()
            .stdout(predicate::str::contains("phase_skipped"))
            .stdout(predicate::str::contains("run_completed"));
    }

    #[test]
    fn test_failed_phase_exits_nonzero_and_reset_clears_state() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".conductor/conductor.toml"),
            "[project]\nid = \"demo\"\n\n[retry]\nmax_phase_attempts = 1\n\n[executors.meta]\ncommand = \"sh\"\nargs = [\"-c\", \"echo invalid request >&2; exit 3\"]\n",
        )
        .unwrap();

        conductor()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("meta"));

        conductor()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("failed"));

        conductor()
            .current_dir(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reset complete"));
        assert!(!dir.path().join(".conductor/runs/demo/state.json").exists());
    }
}
