//! Batch comparison runner.
//!
//! Flow:
//! tasks.jsonl → ComparisonTask → ComparisonPipeline (bounded) → ComparisonRecord → JSONL

use crate::models::{
    ComparisonOperator, ComparisonVerdict, Config, FormalSet, InformalSet, Result,
    SetDescription, SetJudgeError,
};
use crate::pipeline::{ComparisonPipeline, ComparisonTask, FailureKind, PipelineRun, PipelineState};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// One set as written in a task file.
///
/// When both constraints are given the formal one is translated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub informal_constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formal_constraint: Option<String>,
}

impl SetSource {
    /// Convert into a translatable description; `slot` prefixes the error field.
    pub fn into_description(self, slot: &str) -> Result<SetDescription> {
        let informal = self.informal_constraint.filter(|c| !c.trim().is_empty());
        let formal = self.formal_constraint.filter(|c| !c.trim().is_empty());

        match (formal, informal) {
            (Some(formal), informal) => Ok(FormalSet {
                name: self.name,
                informal_constraint: informal.unwrap_or_default(),
                formal_constraint: formal,
                explanation: String::new(),
            }
            .into()),
            (None, Some(informal)) => Ok(InformalSet::new(self.name, informal).into()),
            (None, None) => Err(SetJudgeError::incomplete(format!(
                "{slot}.informal_constraint"
            ))),
        }
    }
}

/// One line of a task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    /// Defaults to `task-<line>`
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub operator: ComparisonOperator,
    pub first: SetSource,
    pub second: SetSource,
}

impl TaskEntry {
    fn into_task(self, line_num: usize) -> Result<ComparisonTask> {
        Ok(ComparisonTask {
            id: self.id.unwrap_or_else(|| format!("task-{line_num}")),
            name: self.name,
            operator: self.operator,
            first: self.first.into_description("first")?,
            second: self.second.into_description("second")?,
        })
    }
}

/// Output line for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub task_id: String,
    pub name: String,
    pub operator: ComparisonOperator,
    pub first: Option<FormalSet>,
    pub second: Option<FormalSet>,
    pub verdict: Option<ComparisonVerdict>,
    /// Whether the verdict confirms `operator`
    pub holds: Option<bool>,
    pub state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<PipelineState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ComparisonRecord {
    pub fn from_run(task: &ComparisonTask, run: PipelineRun) -> Self {
        let holds = run.verdict.as_ref().map(|v| v.holds(task.operator));
        Self {
            task_id: task.id.clone(),
            name: task.name.clone(),
            operator: task.operator,
            first: run.first,
            second: run.second,
            verdict: run.verdict,
            holds,
            state: run.state,
            failed_stage: run.failure.as_ref().map(|f| f.stage),
            failure_kind: run.failure.as_ref().map(|f| f.kind()),
            error: run.failure.as_ref().map(|f| f.cause.to_string()),
            completed_at: Utc::now(),
        }
    }
}

/// Summary of a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    /// Verdicts with `is_equal = true`
    pub equal: usize,
    pub not_equal: usize,
    /// Verdicts confirming the task's operator
    pub held: usize,
    pub runtime_secs: f64,
    /// Completed tasks per hour
    pub throughput_per_hour: f64,
}

impl BatchStats {
    fn record(&mut self, record: &ComparisonRecord) {
        match &record.verdict {
            Some(verdict) => {
                self.done += 1;
                if verdict.is_equal {
                    self.equal += 1;
                } else {
                    self.not_equal += 1;
                }
                if record.holds == Some(true) {
                    self.held += 1;
                }
            }
            None => self.failed += 1,
        }
    }

    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.done as f64 / self.runtime_secs * 3600.0;
        }
    }
}

/// Runs many comparison tasks against one pipeline.
pub struct BatchRunner {
    pipeline: Arc<ComparisonPipeline>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl BatchRunner {
    pub fn new(pipeline: Arc<ComparisonPipeline>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            pipeline,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn from_config(config: &Config, pipeline: Arc<ComparisonPipeline>) -> Self {
        Self::new(pipeline, config.pipeline.max_concurrent_tasks)
    }

    /// Load tasks from a JSONL file, skipping blank lines.
    pub fn load_tasks(path: &Path) -> Result<Vec<ComparisonTask>> {
        let file = File::open(path).map_err(|e| SetJudgeError::io("opening tasks file", e))?;
        let reader = BufReader::new(file);
        let mut tasks = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_num = idx + 1;
            let line = line.map_err(|e| SetJudgeError::io("reading tasks file", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TaskEntry = serde_json::from_str(&line)
                .map_err(|e| SetJudgeError::Parse(format!("Line {}: {}", line_num, e)))?;
            let task = entry.into_task(line_num).inspect_err(|e| {
                warn!(line = line_num, error = %e, "Rejected task");
            })?;
            tasks.push(task);
        }

        info!(count = tasks.len(), "Loaded comparison tasks");
        Ok(tasks)
    }

    /// Run every task and write one record per task, in input order.
    pub async fn run(&self, tasks: Vec<ComparisonTask>, output_path: &Path) -> Result<BatchStats> {
        let start = Instant::now();
        let total = tasks.len();

        info!(
            total_tasks = total,
            max_concurrent = self.max_concurrent,
            "Starting batch comparison"
        );

        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }

        let output_file =
            File::create(output_path).map_err(|e| SetJudgeError::io("creating output file", e))?;
        let mut writer = BufWriter::new(output_file);

        let mut handles = Vec::with_capacity(total);
        for task in tasks {
            let pipeline = Arc::clone(&self.pipeline);
            let semaphore = Arc::clone(&self.semaphore);
            let pb = pb.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| SetJudgeError::Internal("Semaphore closed".to_string()))?;
                let run = pipeline.run(&task).await;
                pb.inc(1);
                Ok::<_, SetJudgeError>(ComparisonRecord::from_run(&task, run))
            }));
        }

        let mut stats = BatchStats {
            total,
            ..Default::default()
        };

        for handle in handles {
            let record = match handle.await {
                Ok(record) => record?,
                Err(e) => {
                    warn!(error = %e, "Task panicked");
                    stats.failed += 1;
                    continue;
                }
            };
            stats.record(&record);

            let json = serde_json::to_string(&record).map_err(|e| {
                SetJudgeError::Internal(format!("Failed to serialize record: {}", e))
            })?;
            writeln!(writer, "{}", json).map_err(|e| SetJudgeError::io("writing output", e))?;

            pb.set_message(format!("done: {}, failed: {}", stats.done, stats.failed));
        }

        writer
            .flush()
            .map_err(|e| SetJudgeError::io("flushing output", e))?;
        pb.finish_with_message(format!(
            "Done! {} compared, {} failed",
            stats.done, stats.failed
        ));

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();

        info!(
            done = stats.done,
            failed = stats.failed,
            equal = stats.equal,
            not_equal = stats.not_equal,
            held = stats.held,
            throughput = format!("{:.0}/hr", stats.throughput_per_hour),
            "Batch comparison complete"
        );

        Ok(stats)
    }
}
