//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use crate::workflow::{GraphView, RunReport};
use serde::{Deserialize, Serialize};

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

/// Events emitted during workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputEvent {
    WorkflowStart {
        name: String,
        steps: usize,
        max_concurrent: usize,
    },
    StepComplete {
        name: String,
    },
    StepError {
        name: String,
        error: String,
    },
    StepSkipped {
        name: String,
        reason: String,
    },
    StepCancelled {
        name: String,
    },
    WorkflowComplete {
        success: bool,
        cancelled: bool,
        duration_ms: u64,
        steps_completed: usize,
        steps_failed: usize,
        steps_skipped: usize,
        total_steps: usize,
    },
    WorkflowError {
        error: String,
    },
    Info {
        message: String,
    },
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write the final report
    fn report(&self, report: &RunReport);

    /// Write a graph snapshot
    fn graph(&self, view: &GraphView) {
        if let Ok(s) = serde_json::to_string_pretty(view) {
            println!("{}", s);
        }
    }
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    /// Create a new console handler
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else {
            format!("{:.1}s", ms as f64 / 1000.0)
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::WorkflowStart {
                name,
                steps,
                max_concurrent,
            } => {
                eprintln!(
                    "Running workflow '{}' ({} steps, up to {} at once)",
                    name, steps, max_concurrent
                );
            }
            OutputEvent::StepComplete { name } => {
                eprintln!("  ✓ {}", name);
            }
            OutputEvent::StepError { name, error } => {
                eprintln!("  ✗ {}: {}", name, error);
            }
            OutputEvent::StepSkipped { name, reason } => {
                eprintln!("  - {} (skipped: {})", name, reason);
            }
            OutputEvent::StepCancelled { name } => {
                eprintln!("  - {} (cancelled)", name);
            }
            OutputEvent::WorkflowComplete {
                success,
                cancelled,
                duration_ms,
                steps_completed,
                steps_failed,
                steps_skipped,
                total_steps,
            } => {
                eprintln!();
                if success {
                    eprintln!(
                        "✓ Workflow completed successfully ({} steps in {})",
                        steps_completed,
                        Self::format_duration(duration_ms)
                    );
                } else if cancelled {
                    eprintln!(
                        "✗ Workflow cancelled after {} of {} steps ({})",
                        steps_completed,
                        total_steps,
                        Self::format_duration(duration_ms)
                    );
                } else {
                    eprintln!(
                        "✗ Workflow failed: {} completed, {} failed, {} skipped ({})",
                        steps_completed,
                        steps_failed,
                        steps_skipped,
                        Self::format_duration(duration_ms)
                    );
                }
            }
            OutputEvent::WorkflowError { error } => {
                eprintln!("Error: {}", error);
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
        }
    }

    fn report(&self, report: &RunReport) {
        if !self.debug {
            return;
        }
        for (id, step) in &report.results {
            if let Some(ms) = step.execution_time_ms {
                eprintln!("[debug] {} took {}", id, Self::format_duration(ms as u64));
            }
        }
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    /// Create a new JSON handler
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    // Only the final report goes to stdout, so it parses as one document
    fn emit(&self, _event: OutputEvent) {}

    fn report(&self, report: &RunReport) {
        self.print_json(report);
    }

    fn graph(&self, view: &GraphView) {
        self.print_json(view);
    }
}

/// Quiet handler that emits nothing
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}
    fn report(&self, _report: &RunReport) {}
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> std::sync::Arc<dyn OutputHandler> {
    match mode {
        OutputMode::Console => std::sync::Arc::new(ConsoleHandler::new(debug)),
        OutputMode::Json => std::sync::Arc::new(JsonHandler::new(true)),
        OutputMode::Quiet => std::sync::Arc::new(QuietHandler),
    }
}

/// Turn a finished report into per-step and summary events
pub fn report_events(report: &RunReport) -> Vec<OutputEvent> {
    let mut events = Vec::new();

    if let Some(ref error) = report.error {
        events.push(OutputEvent::WorkflowError {
            error: error.clone(),
        });
    }

    for (id, step) in &report.results {
        let error = step.error.clone().unwrap_or_default();
        match step.status {
            crate::workflow::StepStatus::Failed => events.push(OutputEvent::StepError {
                name: id.clone(),
                error,
            }),
            crate::workflow::StepStatus::Skipped => events.push(OutputEvent::StepSkipped {
                name: id.clone(),
                reason: error,
            }),
            crate::workflow::StepStatus::Cancelled => {
                events.push(OutputEvent::StepCancelled { name: id.clone() })
            }
            _ => {}
        }
    }

    events.push(OutputEvent::WorkflowComplete {
        success: report.success,
        cancelled: report.cancelled,
        duration_ms: report.duration_ms,
        steps_completed: report.steps_completed,
        steps_failed: report.steps_failed,
        steps_skipped: report.steps_skipped,
        total_steps: report.total_steps,
    });

    events
}
