use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter for the given verbosity; a valid `rust_log` wins over the flags
fn build_filter(rust_log: Option<&str>, debug: bool, quiet: bool) -> EnvFilter {
    if let Some(filter) = rust_log.and_then(|s| EnvFilter::try_new(s).ok()) {
        return filter;
    }

    if debug {
        EnvFilter::new("dagrun=debug")
    } else if quiet {
        EnvFilter::new("dagrun=error")
    } else {
        EnvFilter::new("dagrun=info")
    }
}

/// Initialize logging to stderr, plus `log_file` when given
pub fn init_logging(debug: bool, quiet: bool, log_file: Option<PathBuf>) -> anyhow::Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = build_filter(rust_log.as_deref(), debug, quiet);

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(file)
            .with_target(true)
            .with_line_number(true)
            .with_file(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Default log file for a workflow run, e.g. `~/.config/dagrun/logs/deploy-20250101-120000.log`
pub fn default_log_path(workflow_name: &str) -> anyhow::Result<PathBuf> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("dagrun")
        .join("logs");

    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let filename = format!("{}-{}.log", sanitize(workflow_name), timestamp);

    Ok(log_dir.join(filename))
}

/// Workflow names may be paths; keep only the file stem
fn sanitize(workflow_name: &str) -> String {
    std::path::Path::new(workflow_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "workflow".into())
}
