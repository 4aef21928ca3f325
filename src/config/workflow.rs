//! Workflow and step specifications

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Specification of one step, as supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    /// Step id (unique within workflow)
    pub id: String,

    /// Operation label for the step runner
    pub action: String,

    /// Opaque payload for the step runner
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,

    /// Steps this step depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }
}

/// Full workflow file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Steps in this workflow; order carries no meaning
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl WorkflowConfig {
    /// Field-level checks that don't need the dependency graph
    pub fn lint(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.steps.is_empty() {
            errors.push(format!("workflow '{}' has no steps", self.name));
        }

        for (idx, step) in self.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                errors.push(format!("step #{} has an empty id", idx + 1));
            }
            if step.action.trim().is_empty() {
                errors.push(format!("step '{}' has an empty action", step.id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
