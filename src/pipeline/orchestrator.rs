//! Comparison pipeline: translate two sets, then ask whether they are equal.
//!
//! State flow:
//! TranslatingFirst → TranslatingSecond → Comparing → Done, or → Failed from
//! any non-terminal state. The comparison prompt is only built once both
//! translations validated; no step is retried here.

use crate::client::{InferenceDispatch, InferenceResult};
use crate::models::{
    ComparisonOperator, ComparisonRequest, ComparisonVerdict, Config, DispatchFailure, FormalSet,
    ModelConfig, Result, SetDescription, SetJudgeError,
};
use crate::prompt::{Direction, PromptBuilder, PromptEnvelope};
use crate::schema::{ResultValidator, SchemaRegistry, StructuredType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State of a comparison run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    TranslatingFirst,
    TranslatingSecond,
    Comparing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TranslatingFirst => "translating_first",
            Self::TranslatingSecond => "translating_second",
            Self::Comparing => "comparing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Classification of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DispatchFailed,
    ValidationFailed,
    IncompleteInput,
    InvalidSchema,
    Internal,
}

/// Why a run reached `Failed`, and in which state.
#[derive(Debug)]
pub struct PipelineFailure {
    /// State in which the error was detected
    pub stage: PipelineState,
    /// The originating error
    pub cause: SetJudgeError,
}

impl PipelineFailure {
    pub fn kind(&self) -> FailureKind {
        match &self.cause {
            SetJudgeError::Dispatch(_) => FailureKind::DispatchFailed,
            SetJudgeError::SchemaValidation { .. } => FailureKind::ValidationFailed,
            SetJudgeError::IncompleteInput { .. } => FailureKind::IncompleteInput,
            SetJudgeError::InvalidSchema(_) => FailureKind::InvalidSchema,
            _ => FailureKind::Internal,
        }
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}", self.cause, self.stage)
    }
}

/// One comparison: two source sets and the relation to check.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonTask {
    pub id: String,
    pub name: String,
    pub operator: ComparisonOperator,
    pub first: SetDescription,
    pub second: SetDescription,
}

/// Everything a run produced, up to the state it stopped in.
#[derive(Debug)]
pub struct PipelineRun {
    pub task_id: String,
    pub state: PipelineState,
    /// Every state entered, in order
    pub transitions: Vec<PipelineState>,
    pub first: Option<FormalSet>,
    pub second: Option<FormalSet>,
    pub request: Option<ComparisonRequest>,
    pub verdict: Option<ComparisonVerdict>,
    pub failure: Option<PipelineFailure>,
}

impl PipelineRun {
    fn start(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: PipelineState::TranslatingFirst,
            transitions: vec![PipelineState::TranslatingFirst],
            first: None,
            second: None,
            request: None,
            verdict: None,
            failure: None,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(task_id = %self.task_id, from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
        self.transitions.push(next);
    }

    fn fail(mut self, stage: PipelineState, cause: SetJudgeError) -> Self {
        warn!(task_id = %self.task_id, stage = %stage, error = %cause, "Pipeline failed");
        self.advance(PipelineState::Failed);
        self.failure = Some(PipelineFailure { stage, cause });
        self
    }

    pub fn is_done(&self) -> bool {
        self.state == PipelineState::Done
    }
}

/// Orchestrates translate → translate → compare for one task at a time.
pub struct ComparisonPipeline {
    dispatcher: Arc<dyn InferenceDispatch>,
    builder: PromptBuilder,
    validator: ResultValidator,
    concurrent_translation: bool,
}

impl ComparisonPipeline {
    pub fn new(
        dispatcher: Arc<dyn InferenceDispatch>,
        model_config: ModelConfig,
        registry: Arc<SchemaRegistry>,
    ) -> Result<Self> {
        let builder = PromptBuilder::new(model_config, &registry)?;
        Ok(Self {
            dispatcher,
            builder,
            validator: ResultValidator::new(registry),
            concurrent_translation: true,
        })
    }

    /// Build a pipeline from the `[model]` and `[pipeline]` sections.
    pub fn from_config(config: &Config, dispatcher: Arc<dyn InferenceDispatch>) -> Result<Self> {
        Ok(
            Self::new(dispatcher, config.model.clone(), Arc::new(SchemaRegistry::new()))?
                .with_concurrent_translation(config.pipeline.concurrent_translation),
        )
    }

    /// Dispatch both translations in one batch (true) or one after the other.
    pub fn with_concurrent_translation(mut self, concurrent: bool) -> Self {
        self.concurrent_translation = concurrent;
        self
    }

    pub fn builder(&self) -> &PromptBuilder {
        &self.builder
    }

    /// Dispatch envelopes, padding a short answer with `MissingResult`.
    async fn dispatch_all(&self, envelopes: Vec<PromptEnvelope>) -> Vec<InferenceResult> {
        let ids: Vec<String> = envelopes
            .iter()
            .map(|e| e.conversation_id().to_string())
            .collect();

        let mut results = self.dispatcher.dispatch(envelopes).await.into_iter();

        ids.into_iter()
            .map(|id| {
                results.next().unwrap_or_else(|| {
                    InferenceResult::failure(id.clone(), DispatchFailure::MissingResult(id))
                })
            })
            .collect()
    }

    async fn request<T: StructuredType>(&self, envelope: PromptEnvelope) -> Result<T> {
        let result = self
            .dispatch_all(vec![envelope])
            .await
            .into_iter()
            .next()
            .ok_or_else(|| SetJudgeError::Internal("dispatch returned no result".to_string()))?;
        self.validator.validate(&result)
    }

    /// Single request/validate cycle: translate one set into a [`FormalSet`].
    pub async fn translate(
        &self,
        source: &SetDescription,
        direction: Direction,
    ) -> Result<FormalSet> {
        let envelope = self.builder.build_translation_prompt(source, direction)?;
        self.request(envelope).await
    }

    /// Run one comparison task to a terminal state.
    pub async fn run(&self, task: &ComparisonTask) -> PipelineRun {
        let mut run = PipelineRun::start(&task.id);

        let first_envelope = match self
            .builder
            .build_translation_prompt(&task.first, Direction::for_source(&task.first))
        {
            Ok(envelope) => envelope,
            Err(e) => return run.fail(PipelineState::TranslatingFirst, e),
        };

        let (first, second) = if self.concurrent_translation {
            let second_envelope = match self
                .builder
                .build_translation_prompt(&task.second, Direction::for_source(&task.second))
            {
                Ok(envelope) => envelope,
                Err(e) => return run.fail(PipelineState::TranslatingSecond, e),
            };

            let mut results = self
                .dispatch_all(vec![first_envelope, second_envelope])
                .await
                .into_iter();

            let (Some(first_result), Some(second_result)) = (results.next(), results.next())
            else {
                return run.fail(
                    PipelineState::TranslatingFirst,
                    SetJudgeError::Internal("translation batch lost a result".to_string()),
                );
            };

            let first = match self.validator.validate::<FormalSet>(&first_result) {
                Ok(set) => set,
                Err(e) => return run.fail(PipelineState::TranslatingFirst, e),
            };
            run.first = Some(first.clone());
            run.advance(PipelineState::TranslatingSecond);

            let second = match self.validator.validate::<FormalSet>(&second_result) {
                Ok(set) => set,
                Err(e) => return run.fail(PipelineState::TranslatingSecond, e),
            };
            (first, second)
        } else {
            let first = match self.request::<FormalSet>(first_envelope).await {
                Ok(set) => set,
                Err(e) => return run.fail(PipelineState::TranslatingFirst, e),
            };
            run.first = Some(first.clone());
            run.advance(PipelineState::TranslatingSecond);

            let second = match self
                .translate(&task.second, Direction::for_source(&task.second))
                .await
            {
                Ok(set) => set,
                Err(e) => return run.fail(PipelineState::TranslatingSecond, e),
            };
            (first, second)
        };
        run.second = Some(second.clone());
        run.advance(PipelineState::Comparing);

        let request = match ComparisonRequest::new(task.name.clone(), task.operator, first, second)
        {
            Ok(request) => request,
            Err(e) => return run.fail(PipelineState::Comparing, e),
        };

        let envelope = match self.builder.build_comparison_prompt(&request) {
            Ok(envelope) => envelope,
            Err(e) => return run.fail(PipelineState::Comparing, e),
        };
        run.request = Some(request);

        let verdict = match self.request::<ComparisonVerdict>(envelope).await {
            Ok(verdict) => verdict,
            Err(e) => return run.fail(PipelineState::Comparing, e),
        };

        info!(
            task_id = %task.id,
            is_equal = verdict.is_equal,
            holds = verdict.holds(task.operator),
            "Comparison complete"
        );
        run.verdict = Some(verdict);
        run.advance(PipelineState::Done);
        run
    }
}
