//! Set descriptions, comparison requests and verdicts.
//!
//! These are the data contracts exchanged with the backend. Fields carry no
//! serde defaults: every field is required on the wire, and prompting hints
//! live in [`StructuredType::field_hints`] instead.

use crate::models::{Result, SetJudgeError};
use crate::schema::StructuredType;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A set described in natural language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InformalSet {
    /// Name of the set
    pub name: String,
    /// Free-text description of set membership
    pub informal_constraint: String,
}

impl InformalSet {
    pub fn new(name: impl Into<String>, informal_constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            informal_constraint: informal_constraint.into(),
        }
    }
}

/// A set described both formally and in plain language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FormalSet {
    /// Name of the set
    pub name: String,
    /// Free-text description of set membership
    pub informal_constraint: String,
    /// Set-builder expression defining the members
    pub formal_constraint: String,
    /// Plain-language gloss of the formal constraint
    pub explanation: String,
}

impl FormalSet {
    /// A formal-only source set, used as input for formal → informal translation.
    pub fn from_formal(name: impl Into<String>, formal_constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            informal_constraint: String::new(),
            formal_constraint: formal_constraint.into(),
            explanation: String::new(),
        }
    }

    /// Whether the set can take part in a comparison.
    pub fn is_comparable(&self) -> bool {
        !self.formal_constraint.trim().is_empty()
    }
}

/// A translatable set representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SetDescription {
    Informal(InformalSet),
    Formal(FormalSet),
}

impl SetDescription {
    pub fn name(&self) -> &str {
        match self {
            Self::Informal(set) => &set.name,
            Self::Formal(set) => &set.name,
        }
    }

    /// Field name/value pairs in declaration order, for prompt serialization.
    ///
    /// Empty optional fields of a formal-only source are skipped.
    pub fn prompt_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Informal(set) => vec![
                ("name", set.name.as_str()),
                ("informal_constraint", set.informal_constraint.as_str()),
            ],
            Self::Formal(set) => {
                let mut fields = vec![("name", set.name.as_str())];
                if !set.informal_constraint.is_empty() {
                    fields.push(("informal_constraint", set.informal_constraint.as_str()));
                }
                fields.push(("formal_constraint", set.formal_constraint.as_str()));
                if !set.explanation.is_empty() {
                    fields.push(("explanation", set.explanation.as_str()));
                }
                fields
            }
        }
    }
}

impl From<InformalSet> for SetDescription {
    fn from(set: InformalSet) -> Self {
        Self::Informal(set)
    }
}

impl From<FormalSet> for SetDescription {
    fn from(set: FormalSet) -> Self {
        Self::Formal(set)
    }
}

/// Relation asserted between the two sets of a comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ComparisonOperator {
    #[default]
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl std::str::FromStr for ComparisonOperator {
    type Err = SetJudgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "==" | "eq" | "equal" => Ok(Self::Equal),
            "!=" | "ne" | "not-equal" => Ok(Self::NotEqual),
            other => Err(SetJudgeError::Parse(format!(
                "unknown comparison operator '{other}' (expected == or !=)"
            ))),
        }
    }
}

/// Two translated sets and the relation to check between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ComparisonRequest {
    /// Label of the comparison
    pub name: String,
    /// Relation asserted between the sets
    pub operator: ComparisonOperator,
    /// First operand
    pub first: FormalSet,
    /// Second operand
    pub second: FormalSet,
}

impl ComparisonRequest {
    /// Build a request from two translated sets.
    ///
    /// Fails with `IncompleteInput` if either operand lacks a formal constraint.
    pub fn new(
        name: impl Into<String>,
        operator: ComparisonOperator,
        first: FormalSet,
        second: FormalSet,
    ) -> Result<Self> {
        if !first.is_comparable() {
            return Err(SetJudgeError::incomplete("first.formal_constraint"));
        }
        if !second.is_comparable() {
            return Err(SetJudgeError::incomplete("second.formal_constraint"));
        }
        Ok(Self {
            name: name.into(),
            operator,
            first,
            second,
        })
    }
}

/// Backend verdict on whether two sets are equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ComparisonVerdict {
    /// True if the two sets contain exactly the same members
    pub is_equal: bool,
    /// Justification for the verdict
    pub reason: String,
}

impl ComparisonVerdict {
    /// Whether the verdict confirms the relation `operator` asserts.
    pub fn holds(&self, operator: ComparisonOperator) -> bool {
        match operator {
            ComparisonOperator::Equal => self.is_equal,
            ComparisonOperator::NotEqual => !self.is_equal,
        }
    }
}

impl StructuredType for InformalSet {
    const SCHEMA_NAME: &'static str = "InformalSet";
    const SCHEMA_DESCRIPTION: &'static str = "A set described in natural language";

    fn field_hints() -> &'static [(&'static str, &'static str)] {
        &[("informal_constraint", "a description of the set in natural language")]
    }
}

impl StructuredType for FormalSet {
    const SCHEMA_NAME: &'static str = "FormalSet";
    const SCHEMA_DESCRIPTION: &'static str =
        "A set described with a formal set-builder definition and a plain-language explanation";

    fn field_hints() -> &'static [(&'static str, &'static str)] {
        &[
            ("informal_constraint", "a description of the set in natural language"),
            (
                "formal_constraint",
                "a set theoretical definition of the set members using mathematical symbols",
            ),
            ("explanation", "a short explanation of the set for a mathematical beginner"),
        ]
    }
}

impl StructuredType for ComparisonRequest {
    const SCHEMA_NAME: &'static str = "ComparisonRequest";
    const SCHEMA_DESCRIPTION: &'static str = "Two sets and the relation to check between them";

    fn field_hints() -> &'static [(&'static str, &'static str)] {
        &[]
    }
}

impl StructuredType for ComparisonVerdict {
    const SCHEMA_NAME: &'static str = "ComparisonVerdict";
    const SCHEMA_DESCRIPTION: &'static str = "Whether two sets are equal or not";

    fn field_hints() -> &'static [(&'static str, &'static str)] {
        &[
            ("is_equal", "true if both sets have exactly the same members"),
            ("reason", "a short justification of the verdict"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dogs() -> FormalSet {
        FormalSet {
            name: "Dogs".to_string(),
            informal_constraint: "animals that bark".to_string(),
            formal_constraint: "D = { x | x is an animal ∧ x barks }".to_string(),
            explanation: "all barking animals".to_string(),
        }
    }

    #[test]
    fn test_comparison_request_requires_formal_constraints() {
        let mut empty = dogs();
        empty.formal_constraint = "   ".to_string();

        let err = ComparisonRequest::new("x", ComparisonOperator::Equal, dogs(), empty.clone())
            .unwrap_err();
        assert!(matches!(
            err,
            SetJudgeError::IncompleteInput { ref field } if field == "second.formal_constraint"
        ));

        let err =
            ComparisonRequest::new("x", ComparisonOperator::Equal, empty, dogs()).unwrap_err();
        assert!(matches!(
            err,
            SetJudgeError::IncompleteInput { ref field } if field == "first.formal_constraint"
        ));

        assert!(ComparisonRequest::new("x", ComparisonOperator::NotEqual, dogs(), dogs()).is_ok());
    }

    #[test]
    fn test_operator_wire_format() {
        assert_eq!(
            serde_json::to_string(&ComparisonOperator::NotEqual).unwrap(),
            r#""!=""#
        );
        let op: ComparisonOperator = serde_json::from_str(r#""==""#).unwrap();
        assert_eq!(op, ComparisonOperator::Equal);
        assert!(serde_json::from_str::<ComparisonOperator>(r#""<""#).is_err());
        assert_eq!("!=".parse::<ComparisonOperator>().unwrap(), ComparisonOperator::NotEqual);
        assert!("~".parse::<ComparisonOperator>().is_err());
    }

    #[test]
    fn test_verdict_holds() {
        let equal = ComparisonVerdict {
            is_equal: true,
            reason: "same".to_string(),
        };
        assert!(equal.holds(ComparisonOperator::Equal));
        assert!(!equal.holds(ComparisonOperator::NotEqual));
    }

    #[test]
    fn test_formal_only_prompt_fields_skip_empty_gloss() {
        let set = SetDescription::from(FormalSet::from_formal("E", "E = { x | x barks }"));
        assert_eq!(
            set.prompt_fields(),
            vec![("name", "E"), ("formal_constraint", "E = { x | x barks }")]
        );
    }
}
