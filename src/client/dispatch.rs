//! Inference dispatch boundary.
//!
//! The orchestrator only sees this trait. Backends own transport, retries,
//! batching and concurrency; they report back one result per envelope.

use crate::models::DispatchFailure;
use crate::prompt::PromptEnvelope;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

/// A parsed JSON object as returned by the backend.
pub type JsonObject = serde_json::Map<String, Value>;

/// Outcome of dispatching one envelope.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Conversation ID of the envelope this result answers
    pub envelope_id: String,
    /// The returned object, or why there is none
    pub raw_json_object: Result<JsonObject, DispatchFailure>,
}

impl InferenceResult {
    pub fn success(envelope_id: impl Into<String>, object: JsonObject) -> Self {
        Self {
            envelope_id: envelope_id.into(),
            raw_json_object: Ok(object),
        }
    }

    pub fn failure(envelope_id: impl Into<String>, failure: DispatchFailure) -> Self {
        Self {
            envelope_id: envelope_id.into(),
            raw_json_object: Err(failure),
        }
    }

    /// Wrap an arbitrary JSON value; anything but an object is a malformed completion.
    pub fn from_value(envelope_id: impl Into<String>, value: Value) -> Self {
        match value {
            Value::Object(object) => Self::success(envelope_id, object),
            other => Self::failure(
                envelope_id,
                DispatchFailure::MalformedCompletion(format!(
                    "expected a JSON object, got {other}"
                )),
            ),
        }
    }

    pub fn is_success(&self) -> bool {
        self.raw_json_object.is_ok()
    }
}

/// Sends prompt envelopes to an inference backend.
///
/// Implementations return exactly one result per envelope, in input order.
/// Envelopes in one call are independent and may be processed concurrently.
#[async_trait]
pub trait InferenceDispatch: Send + Sync {
    async fn dispatch(&self, envelopes: Vec<PromptEnvelope>) -> Vec<InferenceResult>;
}

type Responder = dyn Fn(&PromptEnvelope) -> Result<Value, DispatchFailure> + Send + Sync;

/// In-memory dispatcher answering from a closure.
///
/// Records every envelope it receives, which makes it the test double for
/// pipeline runs and a stand-in backend for dry runs.
pub struct ScriptedDispatch {
    responder: Box<Responder>,
    dispatched: Mutex<Vec<PromptEnvelope>>,
}

impl ScriptedDispatch {
    pub fn new(
        responder: impl Fn(&PromptEnvelope) -> Result<Value, DispatchFailure> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// Envelopes received so far, in dispatch order.
    pub fn dispatched(&self) -> Vec<PromptEnvelope> {
        self.dispatched
            .lock()
            .map(|envelopes| envelopes.clone())
            .unwrap_or_default()
    }

    /// Schema names of the envelopes received so far.
    pub fn dispatched_schemas(&self) -> Vec<String> {
        self.dispatched()
            .iter()
            .map(|e| e.structured_output().schema_name().to_string())
            .collect()
    }
}

#[async_trait]
impl InferenceDispatch for ScriptedDispatch {
    async fn dispatch(&self, envelopes: Vec<PromptEnvelope>) -> Vec<InferenceResult> {
        if let Ok(mut log) = self.dispatched.lock() {
            log.extend(envelopes.iter().cloned());
        }

        envelopes
            .iter()
            .map(|envelope| match (self.responder)(envelope) {
                Ok(value) => InferenceResult::from_value(envelope.conversation_id(), value),
                Err(failure) => InferenceResult::failure(envelope.conversation_id(), failure),
            })
            .collect()
    }
}
