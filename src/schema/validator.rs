//! Result validator: the single gate between backend output and typed data.
//!
//! The returned object is checked against the compiled schema of the target
//! type before it is deserialized. Conformance is binary: a violation
//! fails with the offending field path, and no partial instance is built.

use crate::client::{InferenceResult, JsonObject};
use crate::models::{Result, SetJudgeError};
use crate::schema::{SchemaRegistry, StructuredType};
use jsonschema::error::ValidationErrorKind;
use jsonschema::{JSONSchema, ValidationError};
use serde_json::Value;
use std::sync::Arc;

/// Validates backend objects into structured types.
#[derive(Debug, Clone)]
pub struct ResultValidator {
    registry: Arc<SchemaRegistry>,
}

impl ResultValidator {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Validate a dispatch result into `T`.
    ///
    /// A dispatch failure carried by the result is returned as `Dispatch`.
    pub fn validate<T: StructuredType>(&self, result: &InferenceResult) -> Result<T> {
        let object = result
            .raw_json_object
            .as_ref()
            .map_err(|failure| SetJudgeError::Dispatch(failure.clone()))?;
        self.validate_object(object)
    }

    /// Validate a raw JSON object into `T`.
    pub fn validate_object<T: StructuredType>(&self, object: &JsonObject) -> Result<T> {
        let schema = self.registry.compiled_for::<T>()?;
        let value = Value::Object(object.clone());

        check(&schema, &value)?;

        serde_json::from_value(value).map_err(|e| SetJudgeError::validation(ROOT, e.to_string()))
    }
}

const ROOT: &str = "$";

/// Fail with the first violation reported by the compiled schema.
fn check(schema: &JSONSchema, value: &Value) -> Result<()> {
    let Err(mut errors) = schema.validate(value) else {
        return Ok(());
    };
    match errors.next() {
        Some(error) => Err(violation(&error)),
        None => Ok(()),
    }
}

fn violation(error: &ValidationError<'_>) -> SetJudgeError {
    let mut path = dotted(&error.instance_path.to_string());

    // Both kinds are reported against the enclosing object.
    let field = match &error.kind {
        ValidationErrorKind::Required { property } => property.as_str().map(str::to_string),
        ValidationErrorKind::AdditionalProperties { unexpected } => unexpected.first().cloned(),
        _ => None,
    };
    if let Some(field) = field {
        if !path.is_empty() {
            path.push('.');
        }
        path.push_str(&field);
    }

    if path.is_empty() {
        path.push_str(ROOT);
    }
    SetJudgeError::validation(path, error.to_string())
}

/// `/second/tags/1` becomes `second.tags[1]`.
fn dotted(pointer: &str) -> String {
    let mut path = String::new();
    for segment in pointer.split('/').filter(|s| !s.is_empty()) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push_str(&format!("[{segment}]"));
        } else {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(&segment);
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ComparisonOperator, ComparisonRequest, ComparisonVerdict, DispatchFailure, FormalSet,
    };
    use serde_json::json;

    fn validator() -> ResultValidator {
        ResultValidator::new(Arc::new(SchemaRegistry::new()))
    }

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn formal_json() -> Value {
        json!({
            "name": "Dogs",
            "informal_constraint": "Dogs are animals that bark",
            "formal_constraint": "D = { x | x is an animal ∧ x barks }",
            "explanation": "Every animal that barks"
        })
    }

    #[test]
    fn test_accepts_conforming_formal_set() {
        let set: FormalSet = validator().validate_object(&object(formal_json())).unwrap();

        assert_eq!(set.name, "Dogs");
        assert_eq!(set.informal_constraint, "Dogs are animals that bark");
        assert_eq!(set.formal_constraint, "D = { x | x is an animal ∧ x barks }");
        assert_eq!(set.explanation, "Every animal that barks");
    }

    #[test]
    fn test_missing_formal_constraint_fails_with_path() {
        let mut raw = object(formal_json());
        raw.remove("formal_constraint");

        let err = validator().validate_object::<FormalSet>(&raw).unwrap_err();
        assert!(matches!(err, SetJudgeError::SchemaValidation { .. }));
        assert_eq!(err.violation_path(), Some("formal_constraint"));
    }

    #[test]
    fn test_wrong_type_fails_with_path() {
        let raw = object(json!({"is_equal": "yes", "reason": "looks alike"}));
        let err = validator()
            .validate_object::<ComparisonVerdict>(&raw)
            .unwrap_err();
        assert_eq!(err.violation_path(), Some("is_equal"));
        assert!(err.to_string().contains("boolean"));
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let raw = object(json!({"is_equal": false, "reason": "legs differ", "confidence": 0.9}));
        let verdict: ComparisonVerdict = validator().validate_object(&raw).unwrap();
        assert!(!verdict.is_equal);
        assert_eq!(verdict.reason, "legs differ");
    }

    #[test]
    fn test_operator_outside_closed_set() {
        let raw = object(json!({
            "name": "Dogs vs Cats",
            "operator": "<=",
            "first": formal_json(),
            "second": formal_json()
        }));
        let err = validator()
            .validate_object::<ComparisonRequest>(&raw)
            .unwrap_err();
        assert_eq!(err.violation_path(), Some("operator"));
    }

    #[test]
    fn test_nested_paths() {
        let mut second = formal_json();
        second.as_object_mut().unwrap().remove("formal_constraint");
        let raw = object(json!({
            "name": "Dogs vs Dogs",
            "operator": "==",
            "first": formal_json(),
            "second": second
        }));
        let err = validator()
            .validate_object::<ComparisonRequest>(&raw)
            .unwrap_err();
        assert_eq!(err.violation_path(), Some("second.formal_constraint"));

        let raw = object(json!({
            "name": "Dogs vs Dogs",
            "operator": "!=",
            "first": formal_json(),
            "second": formal_json()
        }));
        let request: ComparisonRequest = validator().validate_object(&raw).unwrap();
        assert_eq!(request.operator, ComparisonOperator::NotEqual);
    }

    #[test]
    fn test_dispatch_failure_is_not_a_validation_error() {
        let result = InferenceResult::failure("env-1", DispatchFailure::Cancelled);
        let err = validator().validate::<FormalSet>(&result).unwrap_err();
        assert!(matches!(err, SetJudgeError::Dispatch(DispatchFailure::Cancelled)));
    }

    fn first_violation(schema: Value, value: Value) -> Option<String> {
        let compiled = JSONSchema::compile(&schema).unwrap();
        check(&compiled, &value)
            .err()
            .and_then(|err| err.violation_path().map(str::to_string))
    }

    #[test]
    fn test_additional_properties_false() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "integer", "minimum": 0}},
            "additionalProperties": false
        });
        assert_eq!(
            first_violation(schema.clone(), json!({"a": 1, "b": 2})).as_deref(),
            Some("b")
        );
        assert_eq!(
            first_violation(schema, json!({"a": -1})).as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_array_item_paths() {
        let schema = json!({
            "type": "object",
            "properties": {"tags": {"type": "array", "items": {"type": "string"}}}
        });
        assert_eq!(
            first_violation(schema, json!({"tags": ["a", 3]})).as_deref(),
            Some("tags[1]")
        );
    }

    #[test]
    fn test_nullable_type_arrays() {
        let schema = json!({
            "type": "object",
            "properties": {"note": {"type": ["string", "null"]}}
        });
        assert_eq!(first_violation(schema.clone(), json!({"note": null})), None);
        assert_eq!(
            first_violation(schema, json!({"note": 1.5})).as_deref(),
            Some("note")
        );
    }

    #[test]
    fn test_root_violations_use_dollar() {
        let schema = json!({"type": "object"});
        assert_eq!(first_violation(schema, json!([1, 2])).as_deref(), Some("$"));
    }

    #[test]
    fn test_pointer_to_dotted_path() {
        assert_eq!(dotted(""), "");
        assert_eq!(dotted("/is_equal"), "is_equal");
        assert_eq!(dotted("/second/formal_constraint"), "second.formal_constraint");
        assert_eq!(dotted("/tags/1"), "tags[1]");
        assert_eq!(dotted("/a~1b/c~0d"), "a/b.c~d");
    }
}
