use anyhow::Result;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::PipelineError;
use crate::phase::{PIPELINE_ORDER, Phase};
use crate::progress::ProgressReporter;
use crate::ui::icons::{BUDGET, CHECK, CROSS, PAUSE, RETRY, SKIP, SPARKLE};

/// Terminal UI for a pipeline run, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Pipeline bar: overall percentage across the six phases
/// - Phase bar: spinner with the current phase and its latest status
///
/// Receives orchestrator milestones through [`ProgressReporter`].
pub struct PipelineUI {
    multi: MultiProgress,
    pipeline_bar: ProgressBar,
    phase_bar: ProgressBar,
    verbose: bool,
    current_phase: Mutex<Option<String>>,
}

impl PipelineUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let pipeline_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let pipeline_bar = multi.add(ProgressBar::new(100));
        pipeline_bar.set_style(pipeline_style);
        pipeline_bar.set_prefix("Pipeline");

        let phase_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let phase_bar = multi.add(ProgressBar::new_spinner());
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("   Phase");

        Self {
            multi,
            pipeline_bar,
            phase_bar,
            verbose,
            current_phase: Mutex::new(None),
        }
    }

    /// Print a line above the bars, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Print the run header before the first phase.
    pub fn print_header(&self, project_id: &str, start: Phase, resumed: bool) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} {}",
            style("Project:").bold(),
            style(project_id).cyan()
        ));
        let start_line = if resumed {
            format!("Resuming at {}", style(start.display_name()).yellow())
        } else {
            format!("Starting at {}", style(start.display_name()).yellow())
        };
        self.print_line(format!(
            "{} ({} phases)",
            start_line,
            PIPELINE_ORDER.len()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    fn phase_started(&self, phase: &str) {
        let name = display_name(phase);
        self.phase_bar
            .set_message(format!("{} {}", style(&name).yellow(), style("(running)").dim()));
        self.phase_bar.enable_steady_tick(Duration::from_millis(100));
        if self.verbose {
            self.print_line(format!("  {} {}", style("→").dim(), name));
        }
    }

    fn phase_status(&self, phase: &str, message: &str) {
        let name = display_name(phase);
        if message.starts_with("retrying") {
            self.print_line(format!("  {}{}: {}", RETRY, name, style(message).yellow()));
        } else if message == "skipped" {
            self.print_line(format!(
                "  {}{} {}",
                SKIP,
                name,
                style("not required by the tech stack").dim()
            ));
        }
        self.phase_bar.set_message(format!(
            "{} {}",
            style(&name).yellow(),
            style(format!("({})", message)).dim()
        ));
    }

    fn phase_finished(&self, phase: &str) {
        self.print_line(format!("  {}{}", CHECK, style(display_name(phase)).green()));
    }

    /// Stop the bars and print the final outcome.
    pub fn finish(&self, error: Option<&PipelineError>) {
        self.phase_bar.finish_and_clear();
        match error {
            None => {
                self.pipeline_bar.finish_with_message("done");
                self.print_line(format!(
                    "\n{}{}\n",
                    SPARKLE,
                    style("Pipeline completed").green().bold()
                ));
            }
            Some(e) if e.is_retryable_later() => {
                self.pipeline_bar.abandon_with_message("paused");
                let icon = match e {
                    PipelineError::BudgetExceeded { .. } => BUDGET,
                    _ => PAUSE,
                };
                self.print_line(format!("\n{}{}", icon, style(e).yellow().bold()));
                self.print_line("Run again to resume from the last completed phase.\n");
            }
            Some(e) => {
                self.pipeline_bar.abandon_with_message("failed");
                self.print_line(format!("\n{}{}\n", CROSS, style(e).red().bold()));
            }
        }
    }
}

impl ProgressReporter for PipelineUI {
    fn report(&self, phase: &str, percent: u8, message: Option<&str>) -> Result<()> {
        self.pipeline_bar.set_position(u64::from(percent));

        if phase == Phase::Completed.key() {
            return Ok(());
        }

        let mut current = self
            .current_phase
            .lock()
            .map_err(|_| anyhow::anyhow!("progress state poisoned"))?;
        let is_new = current.as_deref() != Some(phase);

        match message {
            Some(msg) => self.phase_status(phase, msg),
            None if is_new => self.phase_started(phase),
            None => self.phase_finished(phase),
        }
        if is_new {
            *current = Some(phase.to_string());
        }
        Ok(())
    }
}

fn display_name(key: &str) -> String {
    key.parse::<Phase>()
        .map(|p| p.display_name().to_string())
        .unwrap_or_else(|_| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_tracks_position() {
        let ui = PipelineUI::new(false);
        ui.report("meta", 0, None).unwrap();
        ui.report("meta", 16, None).unwrap();
        ui.report("product_owner", 16, Some("retrying (attempt 2)"))
            .unwrap();
        assert_eq!(ui.pipeline_bar.position(), 16);
        assert_eq!(
            ui.current_phase.lock().unwrap().as_deref(),
            Some("product_owner")
        );

        ui.report("completed", 100, None).unwrap();
        assert_eq!(ui.pipeline_bar.position(), 100);
        ui.finish(None);
        assert!(ui.pipeline_bar.is_finished());
    }

    #[test]
    fn test_display_name_falls_back_to_key() {
        assert_eq!(display_name("tech_architect"), "Technical architecture");
        assert_eq!(display_name("unknown"), "unknown");
    }
}
