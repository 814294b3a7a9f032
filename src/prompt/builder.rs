//! Prompt builder: binds typed inputs to their output contracts.
//!
//! Field values are written between `<field>` tags in declaration order, with
//! `&` and `<` escaped so that a value can never open or close a tag. The text
//! is prose for the model, not a wire format.

use crate::models::{
    ComparisonOperator, ComparisonRequest, ComparisonVerdict, FormalSet, ModelConfig, Result,
    SetDescription, SetJudgeError,
};
use crate::prompt::PromptEnvelope;
use crate::schema::{SchemaRegistry, StructuredOutputDescriptor};
use std::borrow::Cow;
use std::fmt::Write;
use std::sync::Arc;

/// Translation direction between set representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    InformalToFormal,
    FormalToInformal,
}

impl Direction {
    /// The direction that completes `source`.
    pub fn for_source(source: &SetDescription) -> Self {
        match source {
            SetDescription::Informal(_) => Self::InformalToFormal,
            SetDescription::Formal(_) => Self::FormalToInformal,
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::InformalToFormal => {
                "Transform the following set, defined in English, into a formal set description. \
                 Keep the name and the English description, add a set-builder definition of its \
                 members and a short explanation."
            }
            Self::FormalToInformal => {
                "Transform the following set, defined formally, into a set description in English. \
                 Keep the name and the formal definition, add an English description of its \
                 members and a short explanation."
            }
        }
    }
}

/// Builds prompt envelopes for translation and comparison requests.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    model_config: Arc<ModelConfig>,
    translation_output: Arc<StructuredOutputDescriptor>,
    comparison_output: Arc<StructuredOutputDescriptor>,
}

impl PromptBuilder {
    /// Create a builder; output descriptors are built once here.
    pub fn new(model_config: ModelConfig, registry: &SchemaRegistry) -> Result<Self> {
        Ok(Self {
            model_config: Arc::new(model_config),
            translation_output: Arc::new(StructuredOutputDescriptor::for_type::<FormalSet>(
                registry,
            )?),
            comparison_output: Arc::new(
                StructuredOutputDescriptor::for_type::<ComparisonVerdict>(registry)?,
            ),
        })
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    /// Envelope asking the backend to translate `source` into a [`FormalSet`].
    pub fn build_translation_prompt(
        &self,
        source: &SetDescription,
        direction: Direction,
    ) -> Result<PromptEnvelope> {
        check_translatable(source, direction)?;

        let mut message = String::new();
        message.push_str(direction.instruction());
        message.push_str("\n\n");
        write_fields(&mut message, &source.prompt_fields());

        Ok(PromptEnvelope::new(
            Arc::clone(&self.model_config),
            Arc::clone(&self.translation_output),
            message,
        ))
    }

    /// Envelope asking the backend whether the two sets of `request` are equal.
    ///
    /// The message is a pure function of `request`.
    pub fn build_comparison_prompt(&self, request: &ComparisonRequest) -> Result<PromptEnvelope> {
        if !request.first.is_comparable() {
            return Err(SetJudgeError::incomplete("first.formal_constraint"));
        }
        if !request.second.is_comparable() {
            return Err(SetJudgeError::incomplete("second.formal_constraint"));
        }

        let question = match request.operator {
            ComparisonOperator::Equal => "Is the first set equal to the second set?",
            ComparisonOperator::NotEqual => "Is the first set different from the second set?",
        };

        let mut message = String::new();
        message.push_str(question);
        message.push_str(
            " Two sets are equal only if they contain exactly the same members. \
             Answer with is_equal and a short reason.\n\n",
        );
        write_fields(
            &mut message,
            &[
                ("comparison", request.name.as_str()),
                ("operator", request.operator.symbol()),
            ],
        );
        write_section(&mut message, "first_set", &request.first);
        write_section(&mut message, "second_set", &request.second);

        Ok(PromptEnvelope::new(
            Arc::clone(&self.model_config),
            Arc::clone(&self.comparison_output),
            message,
        ))
    }
}

fn check_translatable(source: &SetDescription, direction: Direction) -> Result<()> {
    let constraint = match (direction, source) {
        (Direction::InformalToFormal, SetDescription::Informal(set)) => {
            Some(&set.informal_constraint)
        }
        (Direction::InformalToFormal, SetDescription::Formal(set)) => Some(&set.informal_constraint),
        (Direction::FormalToInformal, SetDescription::Formal(set)) => Some(&set.formal_constraint),
        (Direction::FormalToInformal, SetDescription::Informal(_)) => None,
    };

    let field = match direction {
        Direction::InformalToFormal => "informal_constraint",
        Direction::FormalToInformal => "formal_constraint",
    };

    match constraint {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err(SetJudgeError::incomplete(field)),
    }
}

fn write_fields(out: &mut String, fields: &[(&str, &str)]) {
    for (key, value) in fields {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "<{key}>{}</{key}>", escape(value));
    }
}

fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<']) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(value.replace('&', "&amp;").replace('<', "&lt;"))
}

fn write_section(out: &mut String, tag: &str, set: &FormalSet) {
    let _ = writeln!(out, "<{tag}>");
    write_fields(
        out,
        &[
            ("name", set.name.as_str()),
            ("informal_constraint", set.informal_constraint.as_str()),
            ("formal_constraint", set.formal_constraint.as_str()),
            ("explanation", set.explanation.as_str()),
        ],
    );
    let _ = writeln!(out, "</{tag}>");
}
