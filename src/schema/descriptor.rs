//! Structured output descriptor: the contract handed to the backend.

use crate::models::{Result, SetJudgeError};
use crate::schema::{SchemaRegistry, StructuredType};
use serde_json::Value;
use std::sync::Arc;

/// Instruction prepended to the schema when it is shown to the model.
pub const DEFAULT_INSTRUCTION: &str = "Please follow this JSON schema for your response:";

/// Schema document plus the metadata the backend needs to enforce it.
///
/// Immutable once built; share it through `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutputDescriptor {
    schema: Arc<Value>,
    schema_name: String,
    schema_description: String,
    instruction: String,
}

impl StructuredOutputDescriptor {
    /// Build a descriptor from a schema document.
    ///
    /// Fails with `InvalidSchema` unless the document is an object schema with
    /// at least one property.
    pub fn build(
        schema: Arc<Value>,
        schema_name: impl Into<String>,
        schema_description: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Result<Self> {
        let schema_name = schema_name.into();
        if schema_name.trim().is_empty() {
            return Err(SetJudgeError::InvalidSchema(
                "schema name must not be empty".to_string(),
            ));
        }

        let document = schema.as_object().ok_or_else(|| {
            SetJudgeError::InvalidSchema(format!("schema '{schema_name}' is not a JSON object"))
        })?;

        if document.get("type").and_then(Value::as_str) != Some("object") {
            return Err(SetJudgeError::InvalidSchema(format!(
                "schema '{schema_name}' must declare \"type\": \"object\""
            )));
        }

        let has_properties = document
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|p| !p.is_empty());
        if !has_properties {
            return Err(SetJudgeError::InvalidSchema(format!(
                "schema '{schema_name}' declares no properties"
            )));
        }

        Ok(Self {
            schema,
            schema_name,
            schema_description: schema_description.into(),
            instruction: instruction.into(),
        })
    }

    /// Descriptor for a structured type, using its registered name and description.
    pub fn for_type<T: StructuredType>(registry: &SchemaRegistry) -> Result<Self> {
        Self::build(
            registry.schema_for::<T>(),
            T::SCHEMA_NAME,
            T::SCHEMA_DESCRIPTION,
            DEFAULT_INSTRUCTION,
        )
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn schema_description(&self) -> &str {
        &self.schema_description
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Instruction followed by the pretty-printed schema.
    pub fn render_instruction(&self) -> String {
        let schema = serde_json::to_string_pretty(self.schema.as_ref())
            .unwrap_or_else(|_| self.schema.to_string());
        format!("{}\n{}", self.instruction, schema)
    }
}
