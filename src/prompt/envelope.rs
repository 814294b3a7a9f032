//! Prompt envelope: one outbound request, immutable once built.

use crate::models::ModelConfig;
use crate::schema::StructuredOutputDescriptor;
use std::sync::Arc;
use uuid::Uuid;

/// A message bound to a structured output contract and a model.
///
/// Every request gets its own envelope. Nothing is mutated and resent, so
/// envelopes can be dispatched concurrently without aliasing.
#[derive(Debug, Clone)]
pub struct PromptEnvelope {
    conversation_id: String,
    model_config: Arc<ModelConfig>,
    structured_output: Arc<StructuredOutputDescriptor>,
    message: String,
}

impl PromptEnvelope {
    /// Create an envelope with a fresh conversation ID.
    pub fn new(
        model_config: Arc<ModelConfig>,
        structured_output: Arc<StructuredOutputDescriptor>,
        message: impl Into<String>,
    ) -> Self {
        Self::with_id(
            Uuid::new_v4().to_string(),
            model_config,
            structured_output,
            message,
        )
    }

    pub fn with_id(
        conversation_id: impl Into<String>,
        model_config: Arc<ModelConfig>,
        structured_output: Arc<StructuredOutputDescriptor>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            model_config,
            structured_output,
            message: message.into(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    pub fn structured_output(&self) -> &StructuredOutputDescriptor {
        &self.structured_output
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
