//! Configuration types and loading for dagrun

mod loader;
mod workflow;

pub use loader::{DagrunConfig, Defaults, load_workflow, load_workflow_file};
pub use workflow::{StepSpec, WorkflowConfig};
