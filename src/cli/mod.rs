//! CLI module for dagrun
//!
//! This module provides:
//! - Command implementations (run, validate, graph)
//! - Output handlers (console, JSON, quiet)
//!
//! # Example
//!
//! ```ignore
//! use dagrun::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let exit_code = commands::run_workflow("deploy", dir, &config, options, token, handler).await?;
//! ```

pub mod commands;
pub mod output;

pub use commands::{RunOptions, run_workflow, show_graph, validate_workflow};
pub use output::{OutputEvent, OutputHandler, OutputMode, create_handler, report_events};
