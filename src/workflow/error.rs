//! Error types for graph construction and step execution

use super::step::StepStatus;
use std::time::Duration;
use thiserror::Error;

/// Structural errors raised before any step runs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("step '{step}' depends on non-existent step '{dependency}'")]
    MissingDependency { step: String, dependency: String },

    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("topological sort placed {placed} of {total} steps; graph contains a cycle")]
    SortIntegrity { placed: usize, total: usize },
}

impl GraphError {
    /// Returns true if the caller can fix this by correcting the step list.
    /// `SortIntegrity` after a passing validation is a logic bug instead.
    pub fn is_validation(&self) -> bool {
        !matches!(self, GraphError::SortIntegrity { .. })
    }
}

/// A single step failed; isolated to that step
#[derive(Debug, Error)]
pub enum StepExecutionError {
    #[error("{message}")]
    Failed { step: String, message: String },

    #[error("step '{step}' timed out after {timeout:?}")]
    TimedOut { step: String, timeout: Duration },

    #[error("step '{step}' panicked: {message}")]
    Panicked { step: String, message: String },

    #[error("step '{step}' aborted before completion")]
    Aborted { step: String },
}

impl StepExecutionError {
    /// Wrap a runner error, keeping the whole context chain in the message
    pub fn from_runner(step: &str, error: anyhow::Error) -> Self {
        Self::Failed {
            step: step.to_string(),
            message: format!("{:#}", error),
        }
    }

    pub fn step(&self) -> &str {
        match self {
            Self::Failed { step, .. }
            | Self::TimedOut { step, .. }
            | Self::Panicked { step, .. }
            | Self::Aborted { step } => step,
        }
    }
}

/// Rejected lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step '{step}' cannot move from {from} to {to}")]
pub struct TransitionError {
    pub step: String,
    pub from: StepStatus,
    pub to: StepStatus,
}
