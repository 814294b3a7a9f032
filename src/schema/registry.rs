//! Schema registry: JSON Schema documents for the data contracts.
//!
//! Documents are derived from the type declarations with `schemars`, then the
//! type's prompting hints are merged into each property as `examples`. Hints
//! are annotations for the model only: they never change `required` and are
//! never used as fallback values.
//!
//! Each document is compiled with `jsonschema` at most once per registry.

use crate::models::{Result, SetJudgeError};
use jsonschema::JSONSchema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A type the backend can be asked to produce.
pub trait StructuredType: JsonSchema + DeserializeOwned {
    /// Name handed to the backend alongside the schema.
    const SCHEMA_NAME: &'static str;

    /// Human-readable description handed to the backend.
    const SCHEMA_DESCRIPTION: &'static str;

    /// Example text per field name, shown to the model as guidance.
    fn field_hints() -> &'static [(&'static str, &'static str)];
}

/// Derives and caches schema documents per structured type.
#[derive(Default)]
pub struct SchemaRegistry {
    cache: RwLock<HashMap<&'static str, Arc<Value>>>,
    compiled: RwLock<HashMap<&'static str, Arc<JSONSchema>>>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .cache
            .read()
            .map(|cache| cache.keys().copied().collect())
            .unwrap_or_default();
        f.debug_struct("SchemaRegistry")
            .field("schemas", &names)
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema document for `T`, generated on first use.
    pub fn schema_for<T: StructuredType>(&self) -> Arc<Value> {
        if let Ok(cache) = self.cache.read() {
            if let Some(schema) = cache.get(T::SCHEMA_NAME) {
                return Arc::clone(schema);
            }
        }

        let schema = Arc::new(Self::generate::<T>());
        if let Ok(mut cache) = self.cache.write() {
            cache
                .entry(T::SCHEMA_NAME)
                .or_insert_with(|| Arc::clone(&schema));
        }
        schema
    }

    /// Compiled validator for `T`, built from its schema document on first use.
    pub fn compiled_for<T: StructuredType>(&self) -> Result<Arc<JSONSchema>> {
        if let Ok(compiled) = self.compiled.read() {
            if let Some(validator) = compiled.get(T::SCHEMA_NAME) {
                return Ok(Arc::clone(validator));
            }
        }

        let schema = self.schema_for::<T>();
        let validator = JSONSchema::compile(&schema)
            .map(Arc::new)
            .map_err(|e| SetJudgeError::InvalidSchema(format!("{}: {e}", T::SCHEMA_NAME)))?;
        if let Ok(mut compiled) = self.compiled.write() {
            compiled
                .entry(T::SCHEMA_NAME)
                .or_insert_with(|| Arc::clone(&validator));
        }
        Ok(validator)
    }

    /// Generate the schema document for `T` without caching.
    pub fn generate<T: StructuredType>() -> Value {
        let root = schemars::schema_for!(T);
        let mut schema = serde_json::to_value(root).unwrap_or(Value::Null);
        attach_hints(&mut schema, T::field_hints());
        schema
    }
}

fn attach_hints(schema: &mut Value, hints: &[(&str, &str)]) {
    let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) else {
        return;
    };

    for (field, hint) in hints {
        if let Some(Value::Object(property)) = properties.get_mut(*field) {
            property.insert(
                "examples".to_string(),
                Value::Array(vec![Value::String((*hint).to_string())]),
            );
        }
    }
}
