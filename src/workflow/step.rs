//! Step lifecycle state

use super::error::TransitionError;
use crate::config::StepSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle status of a step within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    /// Returns true once no further transition is allowed
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
        )
    }

    /// Allowed transitions
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work and its lifecycle within a run
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    /// Unique key within the run
    pub id: String,

    /// Operation label, interpreted only by the step runner
    pub action: String,

    /// Opaque payload for the step runner
    pub inputs: HashMap<String, serde_json::Value>,

    /// Steps that must complete first
    pub depends_on: Vec<String>,

    status: StepStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
    execution_time_ms: Option<f64>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Step {
    /// Create a pending step
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            inputs: HashMap::new(),
            depends_on: Vec::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            execution_time_ms: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn execution_time_ms(&self) -> Option<f64> {
        self.execution_time_ms
    }

    pub fn started_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.finished_at
    }

    /// Look up a string input
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(|v| v.as_str())
    }

    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.transition(StepStatus::Running)?;
        self.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        result: serde_json::Value,
        execution_time_ms: f64,
    ) -> Result<(), TransitionError> {
        self.transition(StepStatus::Completed)?;
        self.result = Some(result);
        self.execution_time_ms = Some(execution_time_ms);
        self.finished_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(StepStatus::Failed)?;
        self.error = Some(error.into());
        self.finished_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// `reason` is stored in `error`
    pub fn mark_skipped(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(StepStatus::Skipped)?;
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), TransitionError> {
        let was_running = self.status == StepStatus::Running;
        self.transition(StepStatus::Cancelled)?;
        self.error = Some("run cancelled".into());
        if was_running {
            self.finished_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    fn transition(&mut self, next: StepStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                step: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

impl From<StepSpec> for Step {
    fn from(spec: StepSpec) -> Self {
        Self {
            inputs: spec.inputs,
            depends_on: spec.depends_on,
            ..Step::new(spec.id, spec.action)
        }
    }
}
