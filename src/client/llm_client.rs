//! Structured-output client for OpenAI-compatible endpoints.
//!
//! - The chat completions API is the common denominator across hosted
//!   aggregators and on-prem servers (vLLM, Ollama, llama.cpp)
//! - The API may not respond in time, or may answer with something that is
//!   not a JSON object: both surface as `DispatchFailure`
//! - Network availability is unknowable, so transient failures are retried
//!   with exponential backoff

use crate::client::{InferenceDispatch, InferenceResult, JsonObject};
use crate::models::{
    Config, DispatchFailure, ResponseMode, Result, SetJudgeError, expand_headers,
};
use crate::prompt::PromptEnvelope;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Upper bound on a single retry delay, hinted or exponential.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[allow(dead_code)]
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Debug, Default)]
struct UsageCounters {
    requests: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

/// HTTP dispatcher for any OpenAI-compatible endpoint.
///
/// Features:
/// - Structured output via forced tool call, `json_schema` or `json_object`
/// - Retry with exponential backoff on network errors, 429 and 5xx
/// - Bounded concurrency per dispatch batch
/// - Token usage tracking (for logs only)
#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    /// Name of this endpoint (for logging)
    name: String,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    /// Base URL for the API
    base_url: String,
    /// Custom headers to include in requests
    custom_headers: HashMap<String, String>,
    /// Request timeout
    timeout: Duration,
    /// Maximum attempts per request
    max_retries: u32,
    /// Bounds requests in flight across batches
    in_flight: Arc<Semaphore>,
    usage: Arc<UsageCounters>,
}

impl LlmClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// - `name`: Endpoint name for logging (e.g., "openai", "local")
    /// - `api_key`: Optional API key (None for local endpoints)
    /// - `base_url`: Base URL for the API
    /// - `custom_headers`: Additional headers to include in requests
    /// - `timeout_secs`: Request timeout in seconds
    /// - `max_retries`: Maximum attempts per request
    /// - `max_in_flight`: Maximum concurrent requests
    pub fn new(
        name: String,
        api_key: Option<String>,
        base_url: String,
        custom_headers: HashMap<String, String>,
        timeout_secs: u64,
        max_retries: u32,
        max_in_flight: usize,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SetJudgeError::Internal(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            name,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            custom_headers,
            timeout,
            max_retries: max_retries.max(1),
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
            usage: Arc::new(UsageCounters::default()),
        })
    }

    /// Create a client from the `[backend]` and `[model]` sections.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        Self::new(
            config.model.endpoint.clone(),
            api_key,
            config.backend.base_url.clone(),
            expand_headers(&config.backend.headers),
            config.backend.timeout_secs,
            config.backend.max_retries,
            config.backend.max_in_flight,
        )
    }

    /// Get the endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build headers for a request.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(ref api_key) = self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (key, value) in &self.custom_headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }

        headers
    }

    /// Complete one envelope and return the JSON object it produced.
    pub async fn complete(
        &self,
        envelope: &PromptEnvelope,
    ) -> std::result::Result<JsonObject, DispatchFailure> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| DispatchFailure::Cancelled)?;

        let start = Instant::now();
        let mode = envelope.model_config().response_mode;
        let request = build_request(envelope);
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error: Option<DispatchFailure> = None;

        for attempt in 0..self.max_retries {
            let response = self
                .client
                .post(&url)
                .headers(self.headers())
                .json(&request)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        DispatchFailure::Timeout(self.timeout)
                    } else {
                        DispatchFailure::Network(e.to_string())
                    });
                    self.backoff(attempt, None, "network error").await;
                    continue;
                }
            };

            let status = response.status().as_u16();

            if status == 429 {
                let hint = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(retry_after);

                last_error = Some(DispatchFailure::Api {
                    status,
                    message: "rate limited".to_string(),
                });
                self.backoff(attempt, hint, "rate limited").await;
                continue;
            }

            if !response.status().is_success() {
                let error_body = response.text().await.unwrap_or_default();
                let failure = match status {
                    401 => DispatchFailure::AuthenticationFailed,
                    404 => DispatchFailure::ModelNotFound(request.model.clone()),
                    _ => {
                        let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                            .map(|e| e.error.message)
                            .unwrap_or(error_body);
                        DispatchFailure::Api { status, message }
                    }
                };

                if !failure.is_retryable() {
                    return Err(failure);
                }
                last_error = Some(failure);
                self.backoff(attempt, None, "server error").await;
                continue;
            }

            let body: ChatCompletionResponse = response.json().await.map_err(|e| {
                DispatchFailure::MalformedCompletion(format!("failed to parse response: {e}"))
            })?;

            if let Some(usage) = &body.usage {
                self.usage
                    .input_tokens
                    .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
                self.usage
                    .output_tokens
                    .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
            }
            self.usage.requests.fetch_add(1, Ordering::Relaxed);

            let message = body
                .choices
                .into_iter()
                .next()
                .map(|c| c.message)
                .ok_or_else(|| {
                    DispatchFailure::MalformedCompletion("no choices in response".to_string())
                })?;

            debug!(
                endpoint = %self.name,
                model = body.model.as_deref().unwrap_or(&request.model),
                conversation_id = envelope.conversation_id(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Completion received"
            );

            return extract_object(message, mode);
        }

        match last_error {
            Some(failure) if self.max_retries == 1 => Err(failure),
            Some(failure) => Err(DispatchFailure::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: failure.to_string(),
            }),
            None => Err(DispatchFailure::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "unknown error".to_string(),
            }),
        }
    }

    async fn backoff(&self, attempt: u32, hint: Option<Duration>, reason: &str) {
        if attempt + 1 >= self.max_retries {
            return;
        }
        let delay = backoff_delay(attempt, hint);
        debug!(
            endpoint = %self.name,
            attempt = attempt,
            backoff_ms = delay.as_millis() as u64,
            reason = reason,
            "Retrying request"
        );
        tokio::time::sleep(delay).await;
    }

    /// Requests completed and tokens used so far: (requests, input, output).
    pub fn usage(&self) -> (u64, u64, u64) {
        (
            self.usage.requests.load(Ordering::Relaxed),
            self.usage.input_tokens.load(Ordering::Relaxed),
            self.usage.output_tokens.load(Ordering::Relaxed),
        )
    }

    /// Health check: ping the /models endpoint.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let url = format!("{}/models", self.base_url);

        match self
            .client
            .get(&url)
            .headers(self.headers())
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                if response.status().is_success() {
                    HealthCheckResult {
                        endpoint: self.name.clone(),
                        status: HealthStatus::Healthy,
                        latency_ms: Some(latency_ms),
                        error: None,
                    }
                } else {
                    HealthCheckResult {
                        endpoint: self.name.clone(),
                        status: HealthStatus::Unhealthy,
                        latency_ms: Some(latency_ms),
                        error: Some(format!("HTTP {}", response.status().as_u16())),
                    }
                }
            }
            Err(e) => HealthCheckResult {
                endpoint: self.name.clone(),
                status: HealthStatus::Unreachable,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
impl InferenceDispatch for LlmClient {
    async fn dispatch(&self, envelopes: Vec<PromptEnvelope>) -> Vec<InferenceResult> {
        let mut handles = Vec::with_capacity(envelopes.len());

        for envelope in envelopes {
            let client = self.clone();
            let id = envelope.conversation_id().to_string();
            let handle = tokio::spawn(async move { client.complete(&envelope).await });
            handles.push((id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(Ok(object)) => InferenceResult::success(id, object),
                Ok(Err(failure)) => {
                    warn!(endpoint = %self.name, conversation_id = %id, error = %failure, "Dispatch failed");
                    InferenceResult::failure(id, failure)
                }
                Err(e) => {
                    warn!(error = %e, "Dispatch task aborted");
                    InferenceResult::failure(id, DispatchFailure::Cancelled)
                }
            };
            results.push(result);
        }

        results
    }
}

/// Delay named by a `Retry-After` header given in seconds.
///
/// Negative, non-finite and unparseable values are ignored.
fn retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Delay before the retry following `attempt`, never above [`MAX_BACKOFF`].
fn backoff_delay(attempt: u32, hint: Option<Duration>) -> Duration {
    hint.unwrap_or_else(|| Duration::from_secs(2u64.saturating_pow(attempt)))
        .min(MAX_BACKOFF)
}

/// Map an envelope to the chat completion payload for its response mode.
fn build_request(envelope: &PromptEnvelope) -> ChatCompletionRequest {
    let model = envelope.model_config();
    let output = envelope.structured_output();

    let mut request = ChatCompletionRequest {
        model: model.id.clone(),
        messages: vec![
            Message::system(output.render_instruction()),
            Message::user(envelope.message()),
        ],
        max_tokens: model.max_tokens,
        temperature: model.temperature,
        tools: None,
        tool_choice: None,
        response_format: None,
    };

    match model.response_mode {
        ResponseMode::Tool => {
            request.tools = Some(vec![json!({
                "type": "function",
                "function": {
                    "name": output.schema_name(),
                    "description": output.schema_description(),
                    "parameters": output.schema(),
                }
            })]);
            request.tool_choice = Some(json!({
                "type": "function",
                "function": { "name": output.schema_name() }
            }));
        }
        ResponseMode::JsonSchema => {
            request.response_format = Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": output.schema_name(),
                    "description": output.schema_description(),
                    "schema": output.schema(),
                }
            }));
        }
        ResponseMode::JsonObject => {
            request.response_format = Some(json!({ "type": "json_object" }));
        }
    }

    request
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("valid code fence pattern")
    })
}

/// Pull the JSON object out of a completion message.
fn extract_object(
    message: ChatMessage,
    mode: ResponseMode,
) -> std::result::Result<JsonObject, DispatchFailure> {
    if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(DispatchFailure::Refused(refusal));
    }

    let text = match (mode, message.tool_calls.into_iter().next()) {
        (ResponseMode::Tool, Some(call)) => call.function.arguments,
        _ => message.content.unwrap_or_default(),
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DispatchFailure::MalformedCompletion(
            "completion is empty".to_string(),
        ));
    }

    let json_text = code_fence()
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(json_text) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(DispatchFailure::MalformedCompletion(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(DispatchFailure::MalformedCompletion(format!(
            "completion is not valid JSON: {e}"
        ))),
    }
}

/// Health check result.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Endpoint name
    pub endpoint: String,
    /// Health status
    pub status: HealthStatus,
    /// Latency in milliseconds (if reachable)
    pub latency_ms: Option<u64>,
    /// Error message (if unhealthy or unreachable)
    pub error: Option<String>,
}

/// Health status of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Endpoint is responding normally
    Healthy,
    /// Endpoint is responding but with errors
    Unhealthy,
    /// Endpoint is not reachable
    Unreachable,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComparisonVerdict, ModelConfig};
    use crate::schema::{SchemaRegistry, StructuredOutputDescriptor};

    fn envelope(mode: ResponseMode) -> PromptEnvelope {
        let registry = SchemaRegistry::new();
        let descriptor =
            StructuredOutputDescriptor::for_type::<ComparisonVerdict>(&registry).unwrap();
        let mut model = ModelConfig::new("gpt-4o-mini");
        model.response_mode = mode;
        PromptEnvelope::new(Arc::new(model), Arc::new(descriptor), "Are they equal?")
    }

    fn message(json: &str) -> ChatMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_tool_mode_request() {
        let request = serde_json::to_value(build_request(&envelope(ResponseMode::Tool))).unwrap();

        assert_eq!(request["model"], "gpt-4o-mini");
        assert_eq!(request["messages"][0]["role"], "system");
        assert_eq!(request["messages"][1]["content"], "Are they equal?");
        assert_eq!(request["tools"][0]["function"]["name"], "ComparisonVerdict");
        assert_eq!(
            request["tools"][0]["function"]["parameters"]["type"],
            "object"
        );
        assert_eq!(request["tool_choice"]["function"]["name"], "ComparisonVerdict");
        assert!(request.get("response_format").is_none());
    }

    #[test]
    fn test_json_schema_mode_request() {
        let request =
            serde_json::to_value(build_request(&envelope(ResponseMode::JsonSchema))).unwrap();
        assert_eq!(request["response_format"]["type"], "json_schema");
        assert_eq!(
            request["response_format"]["json_schema"]["name"],
            "ComparisonVerdict"
        );
        assert!(request.get("tools").is_none());
    }

    #[test]
    fn test_json_object_mode_embeds_schema_in_system_message() {
        let request =
            serde_json::to_value(build_request(&envelope(ResponseMode::JsonObject))).unwrap();
        assert_eq!(request["response_format"]["type"], "json_object");
        let system = request["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("\"is_equal\""));
    }

    #[test]
    fn test_extract_from_tool_call() {
        let msg = message(
            r#"{"content": null, "tool_calls": [{"id": "call_1", "type": "function",
                "function": {"name": "ComparisonVerdict",
                             "arguments": "{\"is_equal\": false, \"reason\": \"legs\"}"}}]}"#,
        );
        let object = extract_object(msg, ResponseMode::Tool).unwrap();
        assert_eq!(object["is_equal"], false);
    }

    #[test]
    fn test_extract_from_fenced_content() {
        let msg = message(r#"{"content": "```json\n{\"is_equal\": true, \"reason\": \"same\"}\n```"}"#);
        let object = extract_object(msg, ResponseMode::JsonObject).unwrap();
        assert_eq!(object["reason"], "same");
    }

    #[test]
    fn test_extract_failures() {
        let refused = message(r#"{"content": null, "refusal": "I cannot help with that"}"#);
        assert!(matches!(
            extract_object(refused, ResponseMode::JsonSchema),
            Err(DispatchFailure::Refused(_))
        ));

        let array = message(r#"{"content": "[1, 2]"}"#);
        assert!(matches!(
            extract_object(array, ResponseMode::JsonObject),
            Err(DispatchFailure::MalformedCompletion(_))
        ));

        let prose = message(r#"{"content": "The sets are equal."}"#);
        assert!(matches!(
            extract_object(prose, ResponseMode::JsonObject),
            Err(DispatchFailure::MalformedCompletion(_))
        ));

        let empty = message(r#"{"content": "   "}"#);
        assert!(extract_object(empty, ResponseMode::Tool).is_err());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = LlmClient::new(
            "local".to_string(),
            None,
            "http://localhost:11434/v1/".to_string(),
            HashMap::new(),
            5,
            1,
            1,
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434/v1");
        assert_eq!(client.usage(), (0, 0, 0));
    }

    #[test]
    fn test_retry_after_ignores_unusable_values() {
        assert_eq!(retry_after("2.5"), Some(Duration::from_millis(2500)));
        assert_eq!(retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(retry_after("0"), Some(Duration::ZERO));
        assert_eq!(retry_after("-1"), None);
        assert_eq!(retry_after("inf"), None);
        assert_eq!(retry_after("NaN"), None);
        assert_eq!(retry_after("1e300"), None);
        assert_eq!(retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }

    #[test]
    fn test_backoff_delay_is_bounded() {
        assert_eq!(backoff_delay(0, None), Duration::from_secs(1));
        assert_eq!(backoff_delay(3, None), Duration::from_secs(8));
        assert_eq!(backoff_delay(64, None), MAX_BACKOFF);
        assert_eq!(backoff_delay(u32::MAX, None), MAX_BACKOFF);
        assert_eq!(
            backoff_delay(0, Some(Duration::from_millis(250))),
            Duration::from_millis(250)
        );
        assert_eq!(backoff_delay(0, Some(Duration::from_secs(3600))), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_backoff_with_zero_hint_returns_immediately() {
        let client = LlmClient::new(
            "local".to_string(),
            None,
            "http://127.0.0.1:9".to_string(),
            HashMap::new(),
            5,
            3,
            1,
        )
        .unwrap();
        let start = Instant::now();
        client.backoff(0, retry_after("0"), "rate limited").await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_dispatch_keeps_order_and_reports_unreachable_backend() {
        let client = LlmClient::new(
            "local".to_string(),
            None,
            "http://127.0.0.1:9".to_string(),
            HashMap::new(),
            5,
            1,
            2,
        )
        .unwrap();
        let envelopes = vec![
            envelope(ResponseMode::Tool),
            envelope(ResponseMode::JsonSchema),
            envelope(ResponseMode::JsonObject),
        ];
        let ids: Vec<String> = envelopes
            .iter()
            .map(|e| e.conversation_id().to_string())
            .collect();

        let results = client.dispatch(envelopes).await;

        assert_eq!(results.len(), 3);
        let result_ids: Vec<&str> = results.iter().map(|r| r.envelope_id.as_str()).collect();
        assert_eq!(result_ids, ids);
        for result in &results {
            assert!(
                matches!(result.raw_json_object, Err(DispatchFailure::Network(_))),
                "unexpected result: {:?}",
                result.raw_json_object
            );
        }
        assert_eq!(client.usage(), (0, 0, 0));
    }
}
