//! Pipeline executor: runs a registered pipeline step by step.
//!
//! Each step's input is the previous step's output reshaped by the transform
//! the validator selected for that boundary. Local steps call an in-process
//! handler; remote steps are enqueued on the activity's task queue. Every
//! attempt is bounded by the activity's timeout and retried per its retry
//! policy.
//!
//! Execution failures never surface as `Err`: they end the run in the
//! `failed` state with every completed [`StepResult`] preserved. Only problems
//! detected before the first step runs (unknown pipeline, failed validation)
//! are returned as errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{ActivityCatalog, ActivityDescriptor, ActivityKey, ActivityKind};
use crate::definition::{PipelineRegistry, PipelineStep};
use crate::dispatch::{ActivityResult, HandlerTable, RemoteDispatcher, TaskQueueHub};
use crate::error::{ActivityError, PipelineError, Result};
use crate::store::RunStore;
use crate::transform::{TransformContext, TransformRegistry};
use crate::validate::{ValidationReport, Validator};

/// Configuration for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Reject runs whose pipeline fails validation before any step runs.
    pub revalidate_before_run: bool,

    /// Collection attached by transforms when the run input names none.
    pub default_collection: String,

    /// Result count attached to queries that do not specify one.
    pub default_top_k: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            revalidate_before_run: true,
            default_collection: "document_chunks".to_string(),
            default_top_k: 10,
        }
    }
}

impl From<&loom_config::PipelineSection> for ExecutorConfig {
    fn from(section: &loom_config::PipelineSection) -> Self {
        Self {
            revalidate_before_run: section.revalidate_before_run,
            default_collection: section.default_collection.clone(),
            default_top_k: section.default_top_k,
        }
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Stopped at a step boundary by its cancellation token.
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub activity: ActivityKey,
    /// Transform applied to produce this step's input.
    pub transform: Option<String>,
    pub status: StepStatus,
    /// Activity output. `Null` for failed steps.
    pub output: Value,
    /// Dispatch attempts made, including the successful one.
    pub attempt_count: u32,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub step_index: usize,
    pub activity: ActivityKey,
    pub message: String,
    /// Whether the last error was retryable (retries were exhausted).
    pub retryable: bool,
}

/// One execution of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    /// Step results in execution order. A failed run ends with the failed step.
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<RunFailure>,
}

impl PipelineRun {
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline_name.into(),
            status: RunStatus::Pending,
            steps: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            failure: None,
        }
    }

    /// Output of the last successful step.
    pub fn final_output(&self) -> Option<&Value> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.succeeded())
            .map(|s| &s.output)
    }

    /// Successful step results only.
    pub fn completed_steps(&self) -> impl Iterator<Item = &StepResult> + '_ {
        self.steps.iter().filter(|s| s.succeeded())
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    fn fail(&mut self, step: StepResult, retryable: bool) {
        self.failure = Some(RunFailure {
            step_index: step.step_index,
            activity: step.activity.clone(),
            message: step.error.clone().unwrap_or_default(),
            retryable,
        });
        self.steps.push(step);
        self.finish(RunStatus::Failed);
    }
}

/// Executes registered pipelines.
///
/// Holds only shared, read-only state, so one executor can drive many runs
/// concurrently. Each run's state is owned by the future executing it.
pub struct PipelineExecutor {
    catalog: Arc<ActivityCatalog>,
    transforms: Arc<TransformRegistry>,
    pipelines: Arc<PipelineRegistry>,
    handlers: Arc<HandlerTable>,
    remote: Arc<dyn RemoteDispatcher>,
    store: Option<Arc<dyn RunStore>>,
    config: ExecutorConfig,
}

impl PipelineExecutor {
    /// Create an executor with no local handlers and an empty [`TaskQueueHub`].
    pub fn new(
        catalog: Arc<ActivityCatalog>,
        transforms: Arc<TransformRegistry>,
        pipelines: Arc<PipelineRegistry>,
    ) -> Self {
        Self {
            catalog,
            transforms,
            pipelines,
            handlers: Arc::new(HandlerTable::new()),
            remote: Arc::new(TaskQueueHub::new()),
            store: None,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Handlers for `local` steps.
    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Dispatcher for `remote` steps.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteDispatcher>) -> Self {
        self.remote = remote;
        self
    }

    /// Publish every terminal run to `store`.
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn catalog(&self) -> &ActivityCatalog {
        &self.catalog
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Validate a registered pipeline without running it.
    pub fn validate(&self, pipeline_name: &str) -> Result<ValidationReport> {
        let definition = self.pipelines.get(pipeline_name)?;
        Ok(Validator::new(&self.catalog, &self.transforms).validate(&definition))
    }

    /// Run `pipeline_name` against `input`.
    pub async fn execute(&self, pipeline_name: &str, input: Value) -> Result<PipelineRun> {
        self.execute_with_cancel(pipeline_name, input, CancellationToken::new())
            .await
    }

    /// Run `pipeline_name`, stopping at the next step boundary once `cancel` fires.
    ///
    /// A step already in flight is allowed to finish or time out; its result
    /// is discarded and the run ends `cancelled`.
    pub async fn execute_with_cancel(
        &self,
        pipeline_name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<PipelineRun> {
        let definition = self.pipelines.get(pipeline_name)?;
        let report = Validator::new(&self.catalog, &self.transforms).validate(&definition);
        if !report.problems.is_empty() || (self.config.revalidate_before_run && !report.ok) {
            warn!(pipeline = %pipeline_name, "Pre-flight validation failed: {}", report.summary());
            return Err(PipelineError::InvalidPipeline(Box::new(report)));
        }

        let mut run = PipelineRun::new(pipeline_name);
        run.status = RunStatus::Running;
        info!(
            pipeline = %pipeline_name,
            run_id = %run.run_id,
            steps = definition.steps.len(),
            "Starting pipeline run"
        );

        let ctx = TransformContext {
            workflow_input: &input,
            default_collection: &self.config.default_collection,
            default_top_k: self.config.default_top_k,
        };
        let mut current = input.clone();

        for (index, step) in definition.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(run_id = %run.run_id, step = index, "Run cancelled before step");
                run.finish(RunStatus::Cancelled);
                break;
            }

            let transform = report
                .entries
                .get(index)
                .and_then(|entry| entry.transform.clone());
            let started = Instant::now();

            let failed_step = |message: String, attempt_count: u32| StepResult {
                step_index: index,
                activity: step.activity.clone(),
                transform: transform.clone(),
                status: StepStatus::Failed,
                output: Value::Null,
                attempt_count,
                elapsed: started.elapsed(),
                error: Some(message),
            };

            let descriptor = match self.catalog.get(&step.activity) {
                Ok(d) => d,
                Err(e) => {
                    warn!(run_id = %run.run_id, step = index, "{e}");
                    run.fail(failed_step(e.to_string(), 0), false);
                    break;
                }
            };

            let step_input = match self.transforms.apply(transform.as_deref(), &current, &ctx) {
                Ok(v) => v,
                Err(e) => {
                    warn!(run_id = %run.run_id, step = index, "{e}");
                    run.fail(failed_step(e.to_string(), 0), false);
                    break;
                }
            };

            debug!(
                run_id = %run.run_id,
                step = index,
                activity = %step.activity,
                kind = %step.kind,
                transform = transform.as_deref().unwrap_or("passthrough"),
                "Dispatching step"
            );
            let (outcome, attempt_count) =
                self.run_with_retry(step, descriptor, step_input, &cancel).await;

            if cancel.is_cancelled() {
                info!(run_id = %run.run_id, step = index, "Run cancelled; discarding step result");
                run.finish(RunStatus::Cancelled);
                break;
            }

            match outcome {
                Ok(output) => {
                    debug!(
                        run_id = %run.run_id,
                        step = index,
                        attempts = attempt_count,
                        "Step succeeded"
                    );
                    current = output.clone();
                    run.steps.push(StepResult {
                        step_index: index,
                        activity: step.activity.clone(),
                        transform: transform.clone(),
                        status: StepStatus::Succeeded,
                        output,
                        attempt_count,
                        elapsed: started.elapsed(),
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(
                        run_id = %run.run_id,
                        step = index,
                        activity = %step.activity,
                        attempts = attempt_count,
                        "Step failed: {err}"
                    );
                    let retryable = err.is_retryable();
                    run.fail(failed_step(err.to_string(), attempt_count), retryable);
                    break;
                }
            }
        }

        if run.status == RunStatus::Running {
            run.finish(RunStatus::Succeeded);
        }

        info!(
            pipeline = %pipeline_name,
            run_id = %run.run_id,
            status = %run.status,
            completed = run.completed_steps().count(),
            "Pipeline run finished"
        );

        if let Some(store) = &self.store
            && let Err(e) = store.save(&run).await
        {
            warn!(run_id = %run.run_id, "Failed to publish run: {e}");
        }

        Ok(run)
    }

    /// Dispatch with the activity's retry policy. Returns the last outcome and
    /// the number of attempts made.
    async fn run_with_retry(
        &self,
        step: &PipelineStep,
        descriptor: &ActivityDescriptor,
        input: Value,
        cancel: &CancellationToken,
    ) -> (ActivityResult, u32) {
        let policy = &descriptor.retry_policy;
        let max_attempts = policy.attempts();
        let mut attempt = 1;

        loop {
            let outcome = self.dispatch_once(step, descriptor, input.clone()).await;
            let err = match outcome {
                Ok(output) => return (Ok(output), attempt),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return (Err(err), attempt);
            }

            let delay = policy.delay_after(attempt);
            warn!(
                activity = %step.activity,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying: {err}"
            );

            tokio::select! {
                _ = cancel.cancelled() => return (Err(err), attempt),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// One attempt, bounded by the activity's timeout.
    async fn dispatch_once(
        &self,
        step: &PipelineStep,
        descriptor: &ActivityDescriptor,
        input: Value,
    ) -> ActivityResult {
        let timeout = descriptor.timeout;
        let attempt = async {
            match step.kind {
                ActivityKind::Local => self.handlers.invoke(&step.activity, input).await,
                ActivityKind::Remote => {
                    self.remote
                        .dispatch(&descriptor.task_queue, &step.activity, input)
                        .await
                }
            }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::Timeout(timeout)),
        }
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("pipelines", &self.pipelines.names())
            .field("activities", &self.catalog.len())
            .field("config", &self.config)
            .finish()
    }
}
