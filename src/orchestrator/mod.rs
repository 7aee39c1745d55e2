//! The Idle/Studying state machine that ties window changes, captures,
//! classification and batching together.

mod controller;
mod pipeline;
mod state;


pub use controller::{Collaborators, Orchestrator};
pub use state::{ActiveState, OrchestratorSnapshot, PipelineOutcome};
