//! CLI command implementations

use super::output::{OutputEvent, OutputHandler, report_events};
use crate::config::{DagrunConfig, WorkflowConfig, load_workflow};
use crate::signals::CancellationToken;
use crate::workflow::{BuiltinRunner, DependencyGraph, Executor, RunReport};
use std::path::Path;
use std::sync::Arc;

/// Per-invocation overrides of the configured defaults
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_concurrent: Option<usize>,
    /// Per-step timeout in seconds; 0 disables it
    pub timeout: Option<u64>,
}

/// Run a workflow
pub async fn run_workflow(
    workflow_name: &str,
    working_dir: &Path,
    config: &DagrunConfig,
    options: RunOptions,
    cancel: CancellationToken,
    handler: Arc<dyn OutputHandler>,
) -> Result<i32, String> {
    let workflow = load_workflow(workflow_name, Some(working_dir))
        .map_err(|e| format!("Failed to load workflow '{}': {:#}", workflow_name, e))?;

    let mut defaults = config.defaults.clone();
    if let Some(max_concurrent) = options.max_concurrent {
        defaults.max_concurrent = Some(max_concurrent);
    }
    if let Some(timeout) = options.timeout {
        defaults.step_timeout = Some(timeout);
    }

    let progress = Arc::clone(&handler);
    let executor = Executor::from_config(&defaults)
        .with_cancellation(cancel)
        .on_step_complete(move |id, _| {
            progress.emit(OutputEvent::StepComplete {
                name: id.to_string(),
            });
            Ok(())
        });

    handler.emit(OutputEvent::WorkflowStart {
        name: workflow.name.clone(),
        steps: workflow.steps.len(),
        max_concurrent: executor.max_concurrent(),
    });

    let runner = Arc::new(
        BuiltinRunner::new(working_dir).with_command_wrapper(defaults.command_wrapper.clone()),
    );
    let report = executor.execute_workflow(workflow.steps, runner).await;

    for event in report_events(&report) {
        handler.emit(event);
    }
    handler.report(&report);

    Ok(exit_code(&report))
}

fn exit_code(report: &RunReport) -> i32 {
    if report.success { 0 } else { 1 }
}

/// Build the dependency graph for a workflow without running it
fn build_graph(workflow: &WorkflowConfig, config: &DagrunConfig) -> Result<DependencyGraph, String> {
    DependencyGraph::from_specs(workflow.steps.clone(), config.defaults.allow_duplicate_ids())
        .map_err(|e| e.to_string())
}

/// Validate a workflow
pub fn validate_workflow(
    workflow_name: &str,
    working_dir: Option<&Path>,
    config: &DagrunConfig,
    handler: &dyn OutputHandler,
) -> Result<i32, String> {
    let wf = match load_workflow(workflow_name, working_dir) {
        Ok(wf) => wf,
        Err(e) => {
            handler.emit(OutputEvent::WorkflowError {
                error: format!("Failed to load workflow: {:#}", e),
            });
            return Ok(1);
        }
    };

    let levels = build_graph(&wf, config).and_then(|graph| {
        graph.validate().map_err(|e| e.to_string())?;
        graph.topological_sort().map_err(|e| e.to_string())
    });

    match levels {
        Ok(levels) => {
            handler.emit(OutputEvent::Info {
                message: format!(
                    "✓ Workflow '{}' is valid ({} steps, {} levels)",
                    wf.name,
                    wf.steps.len(),
                    levels.len()
                ),
            });
            for (index, level) in levels.iter().enumerate() {
                handler.emit(OutputEvent::Info {
                    message: format!("  level {}: {}", index, level.join(", ")),
                });
            }
            Ok(0)
        }
        Err(error) => {
            handler.emit(OutputEvent::Info {
                message: format!("✗ Workflow '{}' is invalid: {}", wf.name, error),
            });
            Ok(1)
        }
    }
}

/// Print a workflow's graph without running it
pub fn show_graph(
    workflow_name: &str,
    working_dir: Option<&Path>,
    config: &DagrunConfig,
    handler: &dyn OutputHandler,
) -> Result<i32, String> {
    let wf = load_workflow(workflow_name, working_dir)
        .map_err(|e| format!("Failed to load workflow '{}': {:#}", workflow_name, e))?;

    let graph = build_graph(&wf, config)?;
    handler.graph(&graph.view());

    if let Err(e) = graph.validate() {
        handler.emit(OutputEvent::WorkflowError {
            error: e.to_string(),
        });
        return Ok(1);
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::GraphView;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockHandler {
        events: Mutex<Vec<OutputEvent>>,
        reports: Mutex<Vec<RunReport>>,
        graphs: Mutex<Vec<GraphView>>,
    }

    impl MockHandler {
        fn events(&self) -> Vec<OutputEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl OutputHandler for MockHandler {
        fn emit(&self, event: OutputEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn report(&self, report: &RunReport) {
            self.reports.lock().unwrap().push(report.clone());
        }

        fn graph(&self, view: &GraphView) {
            self.graphs.lock().unwrap().push(view.clone());
        }
    }

    fn write_workflow(dir: &TempDir, name: &str, body: &str) {
        let workflows = dir.path().join(".dagrun/workflows");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(workflows.join(format!("{}.toml", name)), body).unwrap();
    }

    const DIAMOND: &str = r#"
        name = "diamond"

        [[steps]]
        id = "root"
        action = "echo"
        inputs = { message = "start" }

        [[steps]]
        id = "left"
        action = "shell"
        depends_on = ["root"]
        inputs = { run = "echo left" }

        [[steps]]
        id = "right"
        action = "sleep"
        depends_on = ["root"]
        inputs = { ms = 5 }

        [[steps]]
        id = "merge"
        action = "echo"
        depends_on = ["left", "right"]
    "#;

    const BROKEN: &str = r#"
        name = "broken"

        [[steps]]
        id = "build"
        action = "shell"
        inputs = { run = "echo 'compiler error' >&2; exit 2" }

        [[steps]]
        id = "deploy"
        action = "echo"
        depends_on = ["build"]
    "#;

    const CYCLIC: &str = r#"
        name = "cyclic"

        [[steps]]
        id = "a"
        action = "echo"
        depends_on = ["b"]

        [[steps]]
        id = "b"
        action = "echo"
        depends_on = ["a"]
    "#;

    #[tokio::test]
    async fn test_run_workflow_success() {
        let dir = TempDir::new().unwrap();
        write_workflow(&dir, "diamond", DIAMOND);
        let handler = Arc::new(MockHandler::default());

        let code = run_workflow(
            "diamond",
            dir.path(),
            &DagrunConfig::default(),
            RunOptions::default(),
            CancellationToken::new(),
            handler.clone(),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        let events = handler.events();
        let completed = events
            .iter()
            .filter(|e| matches!(e, OutputEvent::StepComplete { .. }))
            .count();
        assert_eq!(completed, 4);

        let reports = handler.reports.lock().unwrap();
        assert_eq!(reports[0].steps_completed, 4);
        assert_eq!(reports[0].step_result("left").unwrap()["stdout"], "left");
    }

    #[tokio::test]
    async fn test_run_workflow_failure() {
        let dir = TempDir::new().unwrap();
        write_workflow(&dir, "broken", BROKEN);
        let handler = Arc::new(MockHandler::default());

        let code = run_workflow(
            "broken",
            dir.path(),
            &DagrunConfig::default(),
            RunOptions {
                max_concurrent: Some(1),
                timeout: Some(30),
            },
            CancellationToken::new(),
            handler.clone(),
        )
        .await
        .unwrap();

        assert_eq!(code, 1);
        let events = handler.events();
        assert!(events.contains(&OutputEvent::StepError {
            name: "build".into(),
            error: "compiler error".into(),
        }));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, OutputEvent::StepSkipped { name, .. } if name == "deploy"))
        );
    }

    #[tokio::test]
    async fn test_run_workflow_cancelled() {
        let dir = TempDir::new().unwrap();
        write_workflow(&dir, "diamond", DIAMOND);
        let handler = Arc::new(MockHandler::default());
        let token = CancellationToken::new();
        token.cancel();

        let code = run_workflow(
            "diamond",
            dir.path(),
            &DagrunConfig::default(),
            RunOptions::default(),
            token,
            handler.clone(),
        )
        .await
        .unwrap();

        assert_eq!(code, 1);
        assert!(handler.reports.lock().unwrap()[0].cancelled);
    }

    #[tokio::test]
    async fn test_run_workflow_zero_timeout_means_none() {
        let dir = TempDir::new().unwrap();
        write_workflow(&dir, "diamond", DIAMOND);
        let handler = Arc::new(MockHandler::default());

        let code = run_workflow(
            "diamond",
            dir.path(),
            &DagrunConfig::default(),
            RunOptions {
                max_concurrent: None,
                timeout: Some(0),
            },
            CancellationToken::new(),
            handler.clone(),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(handler.reports.lock().unwrap()[0].steps_failed, 0);
    }

    #[tokio::test]
    async fn test_run_workflow_missing() {
        let dir = TempDir::new().unwrap();
        let handler = Arc::new(MockHandler::default());

        let err = run_workflow(
            "nope",
            dir.path(),
            &DagrunConfig::default(),
            RunOptions::default(),
            CancellationToken::new(),
            handler,
        )
        .await
        .unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_validate_workflow() {
        let dir = TempDir::new().unwrap();
        write_workflow(&dir, "diamond", DIAMOND);
        write_workflow(&dir, "cyclic", CYCLIC);
        let config = DagrunConfig::default();

        let handler = MockHandler::default();
        assert_eq!(
            validate_workflow("diamond", Some(dir.path()), &config, &handler).unwrap(),
            0
        );
        assert!(handler.events().contains(&OutputEvent::Info {
            message: "  level 1: left, right".into()
        }));

        let handler = MockHandler::default();
        assert_eq!(
            validate_workflow("cyclic", Some(dir.path()), &config, &handler).unwrap(),
            1
        );
        assert!(matches!(
            &handler.events()[0],
            OutputEvent::Info { message } if message.contains("cycle")
        ));

        let handler = MockHandler::default();
        assert_eq!(
            validate_workflow("absent", Some(dir.path()), &config, &handler).unwrap(),
            1
        );
    }

    #[test]
    fn test_show_graph() {
        let dir = TempDir::new().unwrap();
        write_workflow(&dir, "diamond", DIAMOND);
        write_workflow(&dir, "cyclic", CYCLIC);
        let config = DagrunConfig::default();

        let handler = MockHandler::default();
        assert_eq!(show_graph("diamond", Some(dir.path()), &config, &handler).unwrap(), 0);
        let graphs = handler.graphs.lock().unwrap();
        assert_eq!(graphs[0].nodes.len(), 4);
        assert_eq!(graphs[0].edges.len(), 4);

        let handler = MockHandler::default();
        assert_eq!(show_graph("cyclic", Some(dir.path()), &config, &handler).unwrap(), 1);
        assert_eq!(handler.graphs.lock().unwrap()[0].nodes.len(), 2);
    }
}
