//! setjudge - Schema-constrained set translation and equality judging.
//!
//! ## Architecture
//!
//! A comparison runs as a small state machine over an inference backend:
//! - **Translate** both sets (informal → formal or formal → informal),
//!   each answer validated against the `FormalSet` schema
//! - **Compare** the two translated sets, validated against `ComparisonVerdict`
//!
//! ## Layers
//!
//! - `schema`: per-type JSON Schemas, output descriptors, result validation
//! - `prompt`: immutable prompt envelopes and the builder producing them
//! - `client`: the `InferenceDispatch` boundary and an OpenAI-compatible backend
//! - `pipeline`: the comparison orchestrator and the JSONL batch runner

pub mod client;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod schema;

// Re-exports for convenience
pub use client::{InferenceDispatch, InferenceResult, LlmClient, ScriptedDispatch};
pub use models::{
    ComparisonOperator, ComparisonRequest, ComparisonVerdict, Config, DispatchFailure, FormalSet,
    InformalSet, ModelConfig, Result, SetDescription, SetJudgeError,
};
pub use pipeline::{BatchRunner, ComparisonPipeline, ComparisonTask, PipelineRun, PipelineState};
pub use prompt::{Direction, PromptBuilder, PromptEnvelope};
pub use schema::{ResultValidator, SchemaRegistry, StructuredOutputDescriptor, StructuredType};
