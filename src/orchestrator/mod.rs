pub mod checkpoint;
pub mod runner;
pub mod state;

pub use checkpoint::PipelineCheckpoint;
pub use runner::{Orchestrator, PipelineSettings};
pub use state::{PhaseStateMachine, StateFile, TransitionRecord};
