//! Configuration models for setjudge.
//!
//! Everything the caller may tune lives here and is loaded from a TOML file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Top-level configuration for setjudge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Inference backend (OpenAI-compatible endpoint)
    #[serde(default)]
    pub backend: BackendConfig,

    /// Model passed through to the backend
    pub model: ModelConfig,

    /// Orchestration settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// OpenAI-compatible endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// API key (may contain ${ENV_VAR} placeholders)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL, e.g. "https://api.openai.com/v1" or "http://localhost:11434/v1"
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum requests in flight per dispatch batch
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Extra headers; values may contain ${ENV_VAR} placeholders
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout() -> u64 {
    120
}

/// Largest accepted `backend.max_retries`.
pub const MAX_RETRIES: u32 = 10;

fn default_max_retries() -> u32 {
    3
}

fn default_max_in_flight() -> usize {
    8
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            max_in_flight: default_max_in_flight(),
            headers: HashMap::new(),
        }
    }
}

/// How the backend is asked to produce structured output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Forced function/tool call whose parameters are the schema
    #[default]
    Tool,
    /// Native `response_format: json_schema`
    JsonSchema,
    /// `response_format: json_object`, schema embedded in the prompt
    JsonObject,
}

/// Model configuration, passed through unmodified to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend identifier (for logging)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model ID as understood by the endpoint
    pub id: String,

    /// Structured output mode
    #[serde(default)]
    pub response_mode: ResponseMode,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f64,

    /// Completion token limit
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_endpoint() -> String {
    "openai".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

impl ModelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            endpoint: default_endpoint(),
            id: id.into(),
            response_mode: ResponseMode::default(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new("gpt-4o-mini")
    }
}

/// Orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Dispatch both translations in one batch instead of one after the other
    #[serde(default = "default_true")]
    pub concurrent_translation: bool,

    /// Comparison tasks processed at once by the batch runner
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_tasks() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrent_translation: true,
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.id.trim().is_empty() {
            return Err(ConfigError::Invalid("model.id must not be empty".to_string()));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "backend.base_url must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_RETRIES).contains(&self.backend.max_retries) {
            return Err(ConfigError::Invalid(format!(
                "backend.max_retries {} outside 1..={MAX_RETRIES}",
                self.backend.max_retries
            )));
        }
        if self.backend.max_in_flight == 0 || self.pipeline.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::Invalid(format!(
                "model.temperature {} outside 0.0..=2.0",
                self.model.temperature
            )));
        }
        Ok(())
    }

    /// Resolve the API key from config or environment.
    ///
    /// `Ok(None)` means no key is configured and the env var is unset, which
    /// is valid for local endpoints.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.backend.api_key {
            let key = expand_env_vars(key);
            if key.contains("${") {
                return Err(ConfigError::MissingApiKey {
                    env_var: key.clone(),
                });
            }
            return Ok(Some(key));
        }

        Ok(std::env::var(&self.backend.api_key_env).ok())
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"))
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in env_var_pattern().captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} or backend.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
