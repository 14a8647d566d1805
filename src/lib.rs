pub mod audit;
pub mod budget;
pub mod config;
pub mod errors;
pub mod executor;
pub mod init;
pub mod orchestrator;
pub mod phase;
pub mod progress;
pub mod recovery;
pub mod retry;
pub mod stack;
pub mod telemetry;
pub mod ui;
pub mod util;
pub mod validation;

pub use errors::PipelineError;
pub use orchestrator::{Orchestrator, PipelineSettings};
pub use phase::Phase;
