//! Pipeline module - comparison orchestration and batch runs.

mod batch;
mod orchestrator;

pub use batch::*;
pub use orchestrator::*;
