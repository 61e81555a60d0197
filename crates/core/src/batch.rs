// Best-effort batch execution of tool calls across connectors.
//
// Steps run in chunks of at most `max_concurrent`; a chunk is awaited as a
// whole before the next one starts. Dependencies are checked, never waited
// for: a step whose dependency has no result fails the whole run.

use crate::error::{ErrorKind, ToolError, ToolResult};
use crate::invoke::Invocation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const MAX_CONCURRENT_LIMIT: usize = 10;

/// Routes a tool call to whichever connector owns it.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        connector: &str,
        tool: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> Invocation;

    /// Every tool reachable through this dispatcher.
    async fn catalog(&self) -> Vec<CatalogEntry>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub connector: String,
    pub tool: String,
    pub description: String,
    pub input_schema: Value,
}

/// One tool call in a batch. Step numbers are 1-based positions in the
/// submitted list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStep {
    pub connector: String,
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Execution order; steps without one keep their position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<usize>,
    /// `"<step>.<field>"` of an earlier result → argument name of this step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_continue_on_error() -> bool {
    true
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            continue_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step: usize,
    pub connector: String,
    pub tool: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub run_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: bool,
    /// Steps never attempted because the run aborted.
    pub skipped: Vec<usize>,
    pub results: Vec<StepOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn failed_steps(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .map(|r| r.step)
            .collect()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Batch {}: {} of {} step(s) succeeded, {} failed",
            if self.aborted { "aborted" } else { "completed" },
            self.succeeded,
            self.total,
            self.failed
        );
        let failed = self.failed_steps();
        if !failed.is_empty() {
            let list: Vec<String> = failed.iter().map(usize::to_string).collect();
            summary.push_str(&format!(" (failed step(s): {})", list.join(", ")));
        }
        if !self.skipped.is_empty() {
            summary.push_str(&format!(", {} skipped", self.skipped.len()));
        }
        summary
    }
}

/// Runs batches through a [`ToolDispatcher`].
pub struct BatchExecutor {
    dispatcher: Arc<dyn ToolDispatcher>,
}

impl BatchExecutor {
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn execute(
        &self,
        steps: Vec<BatchStep>,
        options: BatchOptions,
        cancel: CancellationToken,
    ) -> ToolResult<BatchReport> {
        if steps.is_empty() {
            return Err(ToolError::validation("A batch needs at least one step"));
        }
        if !(1..=MAX_CONCURRENT_LIMIT).contains(&options.max_concurrent) {
            return Err(ToolError::validation(format!(
                "maxConcurrent must be between 1 and {}, got {}",
                MAX_CONCURRENT_LIMIT, options.max_concurrent
            )));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = steps.len();

        tracing::info!(
            %run_id,
            steps = total,
            max_concurrent = options.max_concurrent,
            continue_on_error = options.continue_on_error,
            "Starting batch"
        );

        let mut plan: Vec<(usize, BatchStep)> = steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| (i + 1, step))
            .collect();
        plan.sort_by_key(|(number, step)| step.order.unwrap_or(*number as i64));

        let mut results: HashMap<usize, Value> = HashMap::new();
        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(total);
        let mut skipped = Vec::new();
        let mut aborted = false;

        let chunks: Vec<&[(usize, BatchStep)]> = plan.chunks(options.max_concurrent).collect();

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(%run_id, "Batch cancelled");
                return Err(ToolError::Cancelled);
            }

            let mut prepared = Vec::with_capacity(chunk.len());
            for (number, step) in chunk.iter() {
                let args = prepare_args(*number, step, &results)?;
                prepared.push((*number, step, args));
            }

            let calls = prepared.into_iter().map(|(number, step, args)| {
                let dispatcher = self.dispatcher.clone();
                let token = cancel.child_token();
                async move {
                    let started = Instant::now();
                    let invocation = dispatcher
                        .dispatch(&step.connector, &step.tool, Value::Object(args), token)
                        .await;
                    (number, step, invocation, started.elapsed().as_millis() as u64)
                }
            });

            let mut chunk_failed = false;
            for (number, step, invocation, duration_ms) in futures::future::join_all(calls).await {
                let outcome = if let Some(error) = &invocation.error {
                    chunk_failed = true;
                    tracing::warn!(
                        %run_id,
                        step = number,
                        connector = %step.connector,
                        tool = %step.tool,
                        "Batch step failed"
                    );
                    StepOutcome {
                        step: number,
                        connector: step.connector.clone(),
                        tool: step.tool.clone(),
                        status: StepStatus::Failed,
                        output: None,
                        error: Some(invocation.text()),
                        error_kind: Some(error.kind),
                        duration_ms,
                    }
                } else {
                    let output = invocation
                        .json()
                        .unwrap_or_else(|| Value::String(invocation.text()));
                    results.insert(number, output.clone());
                    StepOutcome {
                        step: number,
                        connector: step.connector.clone(),
                        tool: step.tool.clone(),
                        status: StepStatus::Succeeded,
                        output: Some(output),
                        error: None,
                        error_kind: None,
                        duration_ms,
                    }
                };
                outcomes.push(outcome);
            }

            if cancel.is_cancelled() {
                tracing::warn!(%run_id, "Batch cancelled");
                return Err(ToolError::Cancelled);
            }

            if chunk_failed && !options.continue_on_error {
                aborted = true;
                skipped = chunks[chunk_index + 1..]
                    .iter()
                    .flat_map(|c| c.iter().map(|(number, _)| *number))
                    .collect();
                tracing::warn!(%run_id, skipped = skipped.len(), "Aborting batch after failure");
                break;
            }
        }

        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == StepStatus::Succeeded)
            .count();
        let failed = outcomes.len() - succeeded;

        tracing::info!(%run_id, succeeded, failed, aborted, "Batch finished");

        Ok(BatchReport {
            run_id,
            total,
            succeeded,
            failed,
            aborted,
            skipped,
            results: outcomes,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Check dependencies and apply the output mapping for one step.
fn prepare_args(
    number: usize,
    step: &BatchStep,
    results: &HashMap<usize, Value>,
) -> ToolResult<Map<String, Value>> {
    for dependency in &step.depends_on {
        if !results.contains_key(dependency) {
            return Err(missing_dependency(number, *dependency));
        }
    }

    let mut args = step.args.clone();
    for (source, target) in &step.output_mapping {
        let (source_step, field) = source
            .split_once('.')
            .and_then(|(n, f)| n.parse::<usize>().ok().map(|n| (n, f)))
            .ok_or_else(|| {
                ToolError::validation(format!(
                    "Step {} has malformed output mapping `{}`, expected `<step>.<field>`",
                    number, source
                ))
            })?;

        let result = results
            .get(&source_step)
            .ok_or_else(|| missing_dependency(number, source_step))?;

        match result.get(field) {
            Some(value) => {
                args.insert(target.clone(), value.clone());
            }
            None => {
                tracing::debug!(step = number, source = %source, "Mapped field absent, leaving argument unset");
            }
        }
    }

    Ok(args)
}

fn missing_dependency(step: usize, dependency: usize) -> ToolError {
    ToolError::validation(format!(
        "Step {} depends on step {}, which has not produced a result",
        step, dependency
    ))
}
