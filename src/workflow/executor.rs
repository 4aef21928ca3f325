//! Level-by-level workflow execution

use super::error::{GraphError, StepExecutionError};
use super::graph::DependencyGraph;
use super::report::{GraphView, RunReport};
use super::runner::StepRunner;
use super::step::{Step, StepStatus};
use crate::config::{Defaults, StepSpec};
use crate::signals::CancellationToken;
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle};

/// Progress callback, invoked after each successful step
pub type StepCallback = Arc<dyn Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync>;

/// What a worker task reports back to the coordinator
#[derive(Debug)]
enum StepOutcome {
    Completed { result: Value, elapsed: Duration },
    Failed { error: StepExecutionError, elapsed: Duration },
    Cancelled,
}

/// Runs workflows level by level.
///
/// All steps of a level run concurrently and the next level starts only
/// after every one of them has finished. `max_concurrent` bounds the steps
/// in flight across every run of this executor.
pub struct Executor {
    max_concurrent: usize,
    permits: Arc<Semaphore>,
    step_timeout: Option<Duration>,
    allow_duplicate_ids: bool,
    on_step_complete: Option<StepCallback>,
    cancel: CancellationToken,
    last_graph: Mutex<Option<DependencyGraph>>,
}

impl Executor {
    /// Create an executor; a bound of 0 is treated as 1
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            step_timeout: None,
            allow_duplicate_ids: false,
            on_step_complete: None,
            cancel: CancellationToken::new(),
            last_graph: Mutex::new(None),
        }
    }

    pub fn from_config(defaults: &Defaults) -> Self {
        Self::new(defaults.max_concurrent())
            .with_step_timeout(defaults.step_timeout())
            .allow_duplicate_ids(defaults.allow_duplicate_ids())
    }

    /// Fail any step whose runner takes longer than `timeout`
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Let a repeated step id replace the earlier one
    pub fn allow_duplicate_ids(mut self, allow: bool) -> Self {
        self.allow_duplicate_ids = allow;
        self
    }

    /// Set the progress callback. Its errors are logged and otherwise ignored.
    pub fn on_step_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_step_complete = Some(Arc::new(callback));
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Graph of the most recent run, or an empty graph before the first run
    pub async fn workflow_graph(&self) -> GraphView {
        self.last_graph
            .lock()
            .await
            .as_ref()
            .map(DependencyGraph::view)
            .unwrap_or_default()
    }

    /// Validate and run a workflow.
    ///
    /// Step failures are recorded in the report, never returned as errors.
    /// A structural problem (missing dependency, cycle, duplicate id) yields
    /// a failed report without invoking the runner at all.
    pub async fn execute_workflow<R>(&self, specs: Vec<StepSpec>, runner: Arc<R>) -> RunReport
    where
        R: StepRunner + ?Sized + 'static,
    {
        let started_at = chrono::Utc::now();
        let total = specs.len();

        tracing::info!(
            steps = total,
            max_concurrent = self.max_concurrent,
            "Validating workflow"
        );

        let mut graph = match DependencyGraph::from_specs(specs, self.allow_duplicate_ids) {
            Ok(graph) => graph,
            Err(e) => return self.reject(e, total, started_at, None).await,
        };

        if let Err(e) = graph.validate() {
            return self.reject(e, total, started_at, Some(graph)).await;
        }

        let levels = match graph.topological_sort() {
            Ok(levels) => levels,
            Err(e) => return self.reject(e, total, started_at, Some(graph)).await,
        };

        tracing::info!(steps = graph.len(), levels = levels.len(), "Starting workflow run");

        let mut steps_completed = 0;
        let mut steps_failed = 0;
        let mut interrupted = false;

        for (index, level) in levels.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(level = index, "Run cancelled before level started");
                interrupted = true;
                break;
            }

            let (completed, failed) = self.run_level(index, level, &mut graph, &runner).await;
            steps_completed += completed;
            steps_failed += failed;

            if steps_failed > 0 {
                graph.propagate_skips();
            }
        }

        if interrupted {
            let cancelled = graph.cancel_pending();
            tracing::warn!(cancelled, "Cancelled steps that never started");
        }
        let cancelled = interrupted || graph.count(StepStatus::Cancelled) > 0;

        let report = RunReport::from_graph(
            &graph,
            levels,
            steps_completed,
            steps_failed,
            cancelled,
            started_at,
        );

        tracing::info!(
            success = report.success,
            completed = report.steps_completed,
            failed = report.steps_failed,
            skipped = report.steps_skipped,
            cancelled = report.steps_cancelled,
            duration_ms = report.duration_ms,
            "Workflow run finished"
        );

        *self.last_graph.lock().await = Some(graph);
        report
    }

    async fn reject(
        &self,
        error: GraphError,
        total: usize,
        started_at: chrono::DateTime<chrono::Utc>,
        graph: Option<DependencyGraph>,
    ) -> RunReport {
        if error.is_validation() {
            tracing::error!(error = %error, "Workflow failed validation");
        } else {
            tracing::error!(error = %error, "Topological sort lost steps after validation");
        }
        *self.last_graph.lock().await = graph;
        RunReport::rejected(error.to_string(), total, started_at)
    }

    /// Run one level to its barrier; returns (completed, failed)
    async fn run_level<R>(
        &self,
        index: usize,
        level: &[String],
        graph: &mut DependencyGraph,
        runner: &Arc<R>,
    ) -> (usize, usize)
    where
        R: StepRunner + ?Sized + 'static,
    {
        tracing::debug!(level = index, steps = ?level, "Starting level");

        let mut handles: Vec<(String, JoinHandle<StepOutcome>)> = Vec::with_capacity(level.len());

        for id in level {
            let Some(step) = graph.get_mut(id) else {
                continue;
            };
            // already skipped by an earlier failure
            if step.status() != StepStatus::Pending {
                continue;
            }

            if self.cancel.is_cancelled() {
                if let Err(e) = step.mark_cancelled() {
                    tracing::error!(error = %e, "Illegal cancel transition");
                }
                continue;
            }

            if let Err(e) = step.mark_running() {
                tracing::error!(error = %e, "Illegal start transition");
                continue;
            }

            let handle = self.spawn_step(step.clone(), Arc::clone(runner));
            handles.push((id.clone(), handle));
        }

        // Barrier: every step of the level finishes before any outcome is applied
        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => join_failure(&id, e),
            };
            outcomes.push((id, outcome));
        }

        let mut completed = 0;
        let mut failed = 0;

        for (id, outcome) in outcomes {
            let Some(step) = graph.get_mut(&id) else {
                continue;
            };

            match outcome {
                StepOutcome::Completed { result, elapsed } => {
                    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
                    if let Err(e) = step.mark_completed(result, elapsed_ms) {
                        tracing::error!(error = %e, "Illegal completion transition");
                        continue;
                    }
                    completed += 1;
                    tracing::info!(step = %id, duration_ms = elapsed_ms, "Step completed");

                    if let Some(result) = step.result() {
                        self.notify(&id, result);
                    }
                }
                StepOutcome::Failed { error, elapsed } => {
                    let message = error.to_string();
                    if let Err(e) = step.mark_failed(message.as_str()) {
                        tracing::error!(error = %e, "Illegal failure transition");
                        continue;
                    }
                    failed += 1;
                    tracing::warn!(
                        step = %id,
                        error = %message,
                        duration_ms = elapsed.as_millis() as u64,
                        "Step failed"
                    );
                }
                StepOutcome::Cancelled => {
                    if let Err(e) = step.mark_cancelled() {
                        tracing::error!(error = %e, "Illegal cancel transition");
                        continue;
                    }
                    tracing::info!(step = %id, "Step cancelled before it started");
                }
            }
        }

        tracing::debug!(level = index, completed, failed, "Level finished");
        (completed, failed)
    }

    fn spawn_step<R>(&self, step: Step, runner: Arc<R>) -> JoinHandle<StepOutcome>
    where
        R: StepRunner + ?Sized + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.clone();
        let timeout = self.step_timeout;

        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StepOutcome::Cancelled,
                permit = permits.acquire_owned() => permit,
            };
            // held until the runner returns
            let Ok(_permit) = permit else {
                return StepOutcome::Failed {
                    error: StepExecutionError::Aborted { step: step.id },
                    elapsed: Duration::ZERO,
                };
            };

            let start = Instant::now();
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, runner.run(&step)).await {
                    Ok(result) => result.map_err(|e| StepExecutionError::from_runner(&step.id, e)),
                    Err(_) => Err(StepExecutionError::TimedOut {
                        step: step.id.clone(),
                        timeout: limit,
                    }),
                },
                None => runner
                    .run(&step)
                    .await
                    .map_err(|e| StepExecutionError::from_runner(&step.id, e)),
            };
            let elapsed = start.elapsed();

            match result {
                Ok(result) => StepOutcome::Completed { result, elapsed },
                Err(error) => StepOutcome::Failed { error, elapsed },
            }
        })
    }

    fn notify(&self, id: &str, result: &Value) {
        let Some(callback) = self.on_step_complete.as_ref() else {
            return;
        };

        match catch_unwind(AssertUnwindSafe(|| callback(id, result))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(step = %id, error = %e, "Step completion callback failed");
            }
            Err(_) => {
                tracing::warn!(step = %id, "Step completion callback panicked");
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::from_config(&Defaults::default())
    }
}

fn join_failure(id: &str, error: JoinError) -> StepOutcome {
    let error = if error.is_panic() {
        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        StepExecutionError::Panicked {
            step: id.to_string(),
            message,
        }
    } else {
        StepExecutionError::Aborted {
            step: id.to_string(),
        }
    };

    StepOutcome::Failed {
        error,
        elapsed: Duration::ZERO,
    }
}
