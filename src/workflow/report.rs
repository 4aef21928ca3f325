//! Run report and graph visualization

use super::graph::DependencyGraph;
use super::step::StepStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final outcome of one step
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StepReport {
    pub status: StepStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
}

/// Result of executing a workflow
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunReport {
    /// True only if no step failed and the run was neither invalid nor cancelled
    pub success: bool,

    /// Structural error that stopped the run before any step executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub cancelled: bool,

    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub steps_cancelled: usize,
    pub total_steps: usize,

    /// Execution levels, in order
    #[serde(default)]
    pub levels: Vec<Vec<String>>,

    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,

    /// Per-step outcomes by step id
    pub results: BTreeMap<String, StepReport>,
}

impl RunReport {
    /// Report for a run rejected before any step executed
    pub fn rejected(
        error: impl Into<String>,
        total_steps: usize,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            cancelled: false,
            steps_completed: 0,
            steps_failed: 0,
            steps_skipped: 0,
            steps_cancelled: 0,
            total_steps,
            levels: Vec::new(),
            started_at,
            duration_ms: elapsed_ms(started_at),
            results: BTreeMap::new(),
        }
    }

    /// Build from the final state of a graph
    pub fn from_graph(
        graph: &DependencyGraph,
        levels: Vec<Vec<String>>,
        steps_completed: usize,
        steps_failed: usize,
        cancelled: bool,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let results = graph
            .steps()
            .map(|step| {
                (
                    step.id.clone(),
                    StepReport {
                        status: step.status(),
                        result: step.result().cloned(),
                        error: step.error().map(str::to_string),
                        execution_time_ms: step.execution_time_ms(),
                    },
                )
            })
            .collect();

        Self {
            success: steps_failed == 0 && !cancelled,
            error: None,
            cancelled,
            steps_completed,
            steps_failed,
            steps_skipped: graph.count(StepStatus::Skipped),
            steps_cancelled: graph.count(StepStatus::Cancelled),
            total_steps: graph.len(),
            levels,
            started_at,
            duration_ms: elapsed_ms(started_at),
            results,
        }
    }

    /// Get a specific step's result value
    pub fn step_result(&self, id: &str) -> Option<&serde_json::Value> {
        self.results.get(id).and_then(|r| r.result.as_ref())
    }

    pub fn step_status(&self, id: &str) -> Option<StepStatus> {
        self.results.get(id).map(|r| r.status)
    }

    /// Get list of failed steps
    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps_with(StepStatus::Failed)
    }

    pub fn skipped_steps(&self) -> Vec<&str> {
        self.steps_with(StepStatus::Skipped)
    }

    fn steps_with(&self, status: StepStatus) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| r.status == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

fn elapsed_ms(started_at: chrono::DateTime<chrono::Utc>) -> u64 {
    (chrono::Utc::now() - started_at).num_milliseconds().max(0) as u64
}

/// Node of the visualization graph
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub status: StepStatus,
}

/// Edge from a dependency to its dependent
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

/// Visualization of a workflow graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphView {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
