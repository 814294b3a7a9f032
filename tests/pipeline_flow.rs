//! End-to-end comparison flows.
//!
//! A scripted in-memory backend stands in for the model: it "translates" an
//! informal constraint by wrapping it in set-builder notation and judges two
//! sets equal when their formal constraints match.

use serde_json::{Value, json};
use setjudge::pipeline::{FailureKind, PipelineState};
use setjudge::{
    ComparisonOperator, ComparisonPipeline, ComparisonTask, DispatchFailure, FormalSet,
    InformalSet, ModelConfig, PromptEnvelope, SchemaRegistry, ScriptedDispatch, SetDescription,
};
use std::sync::Arc;

/// Every value enclosed in `<tag>…</tag>` within `message`, in order.
fn tag_values<'a>(message: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut values = Vec::new();
    let mut rest = message;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        values.push(&after[..end]);
        rest = &after[end + close.len()..];
    }
    values
}

fn toy_model(envelope: &PromptEnvelope) -> Result<Value, DispatchFailure> {
    let message = envelope.message();
    match envelope.structured_output().schema_name() {
        "FormalSet" => {
            let name = tag_values(message, "name")[0];
            let informal = tag_values(message, "informal_constraint")
                .first()
                .copied()
                .unwrap_or("");
            let formal = match tag_values(message, "formal_constraint").first() {
                Some(formal) => formal.to_string(),
                None => format!("{{ x | {informal} }}"),
            };
            Ok(json!({
                "name": name,
                "informal_constraint": informal,
                "formal_constraint": formal,
                "explanation": format!("the members of {name}"),
            }))
        }
        "ComparisonVerdict" => {
            let formal = tag_values(message, "formal_constraint");
            let is_equal = formal.len() == 2 && formal[0] == formal[1];
            Ok(json!({
                "is_equal": is_equal,
                "reason": format!("compared {} against {}", formal[0], formal[1]),
            }))
        }
        other => Err(DispatchFailure::MalformedCompletion(format!(
            "unexpected schema {other}"
        ))),
    }
}

fn pipeline(dispatcher: &Arc<ScriptedDispatch>) -> ComparisonPipeline {
    ComparisonPipeline::new(
        Arc::clone(dispatcher) as Arc<dyn setjudge::InferenceDispatch>,
        ModelConfig::default(),
        Arc::new(SchemaRegistry::new()),
    )
    .unwrap()
}

fn informal_task(first: InformalSet, second: InformalSet) -> ComparisonTask {
    ComparisonTask {
        id: "flow".to_string(),
        name: format!("{} == {}", first.name, second.name),
        operator: ComparisonOperator::Equal,
        first: first.into(),
        second: second.into(),
    }
}

// ============================================================================
// Happy paths
// ============================================================================

#[tokio::test]
async fn test_dogs_and_cats_are_not_equal() {
    let dispatcher = Arc::new(ScriptedDispatch::new(toy_model));
    let task = informal_task(
        InformalSet::new("Dogs", "Dogs are animals that bark with four legs"),
        InformalSet::new("Cats", "Cats are animals that meow with four legs"),
    );

    let run = pipeline(&dispatcher).run(&task).await;

    assert_eq!(run.state, PipelineState::Done);
    assert_eq!(
        run.transitions,
        vec![
            PipelineState::TranslatingFirst,
            PipelineState::TranslatingSecond,
            PipelineState::Comparing,
            PipelineState::Done,
        ]
    );

    let first = run.first.as_ref().unwrap();
    assert_eq!(first.name, "Dogs");
    assert_eq!(
        first.formal_constraint,
        "{ x | Dogs are animals that bark with four legs }"
    );
    assert_eq!(run.second.as_ref().unwrap().name, "Cats");

    let verdict = run.verdict.as_ref().unwrap();
    assert!(!verdict.is_equal);
    assert!(!verdict.holds(ComparisonOperator::Equal));

    assert_eq!(
        dispatcher.dispatched_schemas(),
        vec!["FormalSet", "FormalSet", "ComparisonVerdict"]
    );

    let envelopes = dispatcher.dispatched();
    let ids: Vec<&str> = envelopes.iter().map(|e| e.conversation_id()).collect();
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
}

#[tokio::test]
async fn test_identical_constraints_are_equal() {
    let dispatcher = Arc::new(ScriptedDispatch::new(toy_model));
    let task = informal_task(
        InformalSet::new("Barkers", "x barks"),
        InformalSet::new("Dogs", "x barks"),
    );

    let run = pipeline(&dispatcher).run(&task).await;

    assert!(run.is_done());
    assert!(run.failure.is_none());
    assert!(run.verdict.unwrap().is_equal);

    let request = run.request.unwrap();
    assert_eq!(request.first.formal_constraint, "{ x | x barks }");
    assert_eq!(request.second.formal_constraint, "{ x | x barks }");
}

#[tokio::test]
async fn test_formal_sources_translate_to_english_then_compare() {
    let dispatcher = Arc::new(ScriptedDispatch::new(toy_model));
    let task = ComparisonTask {
        id: "formal".to_string(),
        name: "evens != odds".to_string(),
        operator: ComparisonOperator::NotEqual,
        first: SetDescription::from(FormalSet::from_formal("Evens", "{ n | n mod 2 = 0 }")),
        second: SetDescription::from(FormalSet::from_formal("Odds", "{ n | n mod 2 = 1 }")),
    };

    let run = pipeline(&dispatcher).run(&task).await;

    assert!(run.is_done());
    assert!(run.verdict.unwrap().holds(ComparisonOperator::NotEqual));

    let envelopes = dispatcher.dispatched();
    assert!(envelopes[0].message().contains("defined formally"));
    assert!(envelopes[2]
        .message()
        .starts_with("Is the first set different from the second set?"));
}

#[tokio::test]
async fn test_sequential_translation_gives_same_verdict() {
    let dispatcher = Arc::new(ScriptedDispatch::new(toy_model));
    let task = informal_task(
        InformalSet::new("A", "x barks"),
        InformalSet::new("B", "x meows"),
    );

    let run = pipeline(&dispatcher)
        .with_concurrent_translation(false)
        .run(&task)
        .await;

    assert!(run.is_done());
    assert!(!run.verdict.unwrap().is_equal);
    assert_eq!(dispatcher.dispatched().len(), 3);
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_first_translation_failure_never_reaches_comparison() {
    let dispatcher = Arc::new(ScriptedDispatch::new(|envelope| {
        if envelope.message().contains("<name>Dogs</name>") {
            return Err(DispatchFailure::Timeout(std::time::Duration::from_secs(30)));
        }
        toy_model(envelope)
    }));
    let task = informal_task(
        InformalSet::new("Dogs", "Dogs are animals that bark with four legs"),
        InformalSet::new("Cats", "Cats are animals that meow with four legs"),
    );

    let run = pipeline(&dispatcher).run(&task).await;

    assert_eq!(run.state, PipelineState::Failed);
    assert_eq!(
        run.transitions,
        vec![PipelineState::TranslatingFirst, PipelineState::Failed]
    );

    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.stage, PipelineState::TranslatingFirst);
    assert_eq!(failure.kind(), FailureKind::DispatchFailed);

    assert!(run.first.is_none());
    assert!(run.request.is_none());
    assert!(run.verdict.is_none());
    assert!(!dispatcher
        .dispatched_schemas()
        .iter()
        .any(|schema| schema == "ComparisonVerdict"));
}

#[tokio::test]
async fn test_malformed_verdict_fails_in_comparing() {
    let dispatcher = Arc::new(ScriptedDispatch::new(|envelope| {
        match envelope.structured_output().schema_name() {
            "ComparisonVerdict" => Ok(json!({"is_equal": "maybe", "reason": "unsure"})),
            _ => toy_model(envelope),
        }
    }));
    let task = informal_task(InformalSet::new("A", "a"), InformalSet::new("B", "b"));

    let run = pipeline(&dispatcher).run(&task).await;

    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.stage, PipelineState::Comparing);
    assert_eq!(failure.kind(), FailureKind::ValidationFailed);
    assert_eq!(failure.cause.violation_path(), Some("is_equal"));
    assert!(run.first.is_some());
    assert!(run.second.is_some());
}
