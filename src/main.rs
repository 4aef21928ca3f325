use anyhow::Result;
use clap::{Parser, Subcommand};
use dagrun::cli::{self, OutputMode, RunOptions};
use dagrun::config::DagrunConfig;
use dagrun::logging;
use dagrun::signals::{CancellationToken, setup_signal_handlers};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dagrun")]
#[command(about = "Run workflows of dependent steps, level by level")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Working directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow
    Run {
        /// Workflow name or path
        workflow: String,

        /// Max steps in flight at once
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Per-step timeout in seconds (0 for none)
        #[arg(long)]
        timeout: Option<u64>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputMode::Console)]
        output: OutputMode,
    },

    /// Validate a workflow and print its levels
    Validate {
        /// Workflow name or path
        workflow: String,
    },

    /// Print a workflow's dependency graph as JSON
    Graph {
        /// Workflow name or path
        workflow: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let working_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = DagrunConfig::load(Some(&working_dir))?;

    let log_file = cli.log_file.or_else(|| config.defaults.log_file_path());
    logging::init_logging(cli.debug, cli.quiet, log_file)?;

    let code = match cli.command {
        Commands::Run {
            workflow,
            max_concurrent,
            timeout,
            output,
        } => {
            let mode = if cli.quiet { OutputMode::Quiet } else { output };
            let handler = cli::create_handler(mode, cli.debug);

            let token = CancellationToken::new();
            tokio::spawn(setup_signal_handlers(token.clone()));

            let options = RunOptions {
                max_concurrent,
                timeout,
            };
            cli::run_workflow(&workflow, &working_dir, &config, options, token, handler).await
        }

        Commands::Validate { workflow } => {
            let handler = cli::create_handler(OutputMode::Console, cli.debug);
            cli::validate_workflow(&workflow, Some(&working_dir), &config, &*handler)
        }

        Commands::Graph { workflow } => {
            let handler = cli::create_handler(OutputMode::Console, cli.debug);
            cli::show_graph(&workflow, Some(&working_dir), &config, &*handler)
        }
    };

    match code {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
