//! Workflow execution engine for dagrun
//!
//! This module handles:
//! - Step lifecycle and state transitions
//! - Dependency graph validation and leveling
//! - Level-by-level concurrent execution with skip propagation
//!
//! # Example
//!
//! ```ignore
//! use dagrun::config::load_workflow;
//! use dagrun::workflow::{BuiltinRunner, Executor};
//! use std::sync::Arc;
//!
//! let workflow = load_workflow("deploy", None)?;
//! let executor = Executor::new(4);
//! let report = executor
//!     .execute_workflow(workflow.steps, Arc::new(BuiltinRunner::new(".")))
//!     .await;
//!
//! if report.success {
//!     println!("Workflow completed successfully!");
//! }
//! ```

mod builtin;
mod error;
mod executor;
mod graph;
mod report;
mod runner;
mod step;

pub use builtin::BuiltinRunner;
pub use error::{GraphError, StepExecutionError, TransitionError};
pub use executor::{Executor, StepCallback};
pub use graph::DependencyGraph;
pub use report::{GraphEdge, GraphNode, GraphView, RunReport, StepReport};
pub use runner::{FnRunner, StepRunner, runner_fn};
pub use step::{Step, StepStatus};
