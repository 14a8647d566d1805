//! Progress callbacks.
//!
//! The orchestrator reports `(phase, percent, message)` at fixed milestones.
//! A failing or panicking reporter is logged and otherwise ignored.

use anyhow::Result;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use tracing::warn;

pub trait ProgressReporter: Send + Sync {
    fn report(&self, phase: &str, percent: u8, message: Option<&str>) -> Result<()>;
}

impl<F> ProgressReporter for F
where
    F: Fn(&str, u8, Option<&str>) -> Result<()> + Send + Sync,
{
    fn report(&self, phase: &str, percent: u8, message: Option<&str>) -> Result<()> {
        self(phase, percent, message)
    }
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _phase: &str, _percent: u8, _message: Option<&str>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: String,
    pub percent: u8,
    pub message: Option<String>,
}

/// Reporter that keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, phase: &str, percent: u8, message: Option<&str>) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(ProgressEvent {
                phase: phase.to_string(),
                percent,
                message: message.map(str::to_string),
            });
        }
        Ok(())
    }
}

/// Invoke `reporter`, swallowing errors and panics.
pub fn notify(reporter: &dyn ProgressReporter, phase: &str, percent: u8, message: Option<&str>) {
    let percent = percent.min(100);
    match catch_unwind(AssertUnwindSafe(|| reporter.report(phase, percent, message))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(phase, percent, error = %format!("{:#}", e), "Progress reporter failed"),
        Err(_) => warn!(phase, percent, "Progress reporter panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |phase: &str, percent: u8, _msg: Option<&str>| -> Result<()> {
            seen.lock().unwrap().push((phase.to_string(), percent));
            Ok(())
        };
        notify(&reporter, "meta", 0, None);
        assert_eq!(seen.into_inner().unwrap(), vec![("meta".to_string(), 0)]);
    }

    #[test]
    fn test_errors_are_swallowed() {
        let reporter =
            |_: &str, _: u8, _: Option<&str>| -> Result<()> { anyhow::bail!("socket closed") };
        notify(&reporter, "designer", 50, Some("working"));
    }

    #[test]
    fn test_panics_are_swallowed() {
        let reporter = |_: &str, _: u8, _: Option<&str>| -> Result<()> { panic!("boom") };
        notify(&reporter, "designer", 50, None);
    }

    #[test]
    fn test_percent_is_clamped() {
        let reporter = CollectingReporter::new();
        notify(&reporter, "completed", 180, None);
        assert_eq!(reporter.events()[0].percent, 100);
    }
}
