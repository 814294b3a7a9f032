//! Inference dispatch: the boundary trait and its OpenAI-compatible backend.

mod dispatch;
mod llm_client;

pub use dispatch::*;
pub use llm_client::*;
