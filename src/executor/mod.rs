//! Phase executors: the opaque workers that do each phase's job.
//!
//! An executor receives the accumulated named inputs, may write artifact
//! files into the workspace, and returns its result text plus usage for cost
//! accounting. Failures are arbitrary errors; executors that know why they
//! failed should return a [`crate::retry::classify::WorkerFailure`].

pub mod command;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::phase::Phase;

pub use command::{CommandExecutor, CommandSpec};

/// Named string inputs handed to a phase.
pub type PhaseInputs = BTreeMap<String, String>;

/// Input key carrying the worker suggested by the recovery engine.
pub const ASSIGNED_WORKER_KEY: &str = "assigned_worker";

/// Units consumed by one executor call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub input_units: u64,
    pub output_units: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutput {
    pub result: String,
    pub usage: Usage,
}

impl PhaseOutput {
    pub fn text(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            usage: Usage::default(),
        }
    }
}

/// Worker for a single phase.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Name used for pricing and cost attribution.
    fn worker(&self) -> &str;

    async fn execute(
        &self,
        phase: Phase,
        inputs: &PhaseInputs,
        workspace: &Path,
    ) -> Result<PhaseOutput>;
}
