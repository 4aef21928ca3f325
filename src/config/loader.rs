//! Configuration loading with multi-layer merge

use super::WorkflowConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level dagrun configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DagrunConfig {
    /// Global defaults
    #[serde(default)]
    pub defaults: Defaults,
}

/// Global default settings
///
/// Every field is optional so a later config layer can override an earlier
/// one with any value, including the built-in default.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Max steps in flight at once, across the whole executor
    pub max_concurrent: Option<usize>,

    /// Per-step timeout in seconds; 0 disables it
    pub step_timeout: Option<u64>,

    /// Let a repeated step id replace the earlier one instead of failing validation
    pub allow_duplicate_ids: Option<bool>,

    /// Shell command wrapper for shell steps (for nix-shell, docker, etc.)
    pub command_wrapper: Option<String>,

    /// Also write logs to this file
    pub log_file: Option<String>,
}

const DEFAULT_MAX_CONCURRENT: usize = 10;

impl Defaults {
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn allow_duplicate_ids(&self) -> bool {
        self.allow_duplicate_ids.unwrap_or(false)
    }

    /// Log file path with `~` expanded
    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.log_file
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
    }
}

impl DagrunConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/dagrun/config.toml
    /// 3. .dagrun/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_dir
            .map(|p| p.join(".dagrun/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".dagrun/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/dagrun/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dagrun/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.defaults.max_concurrent.is_some() {
            self.defaults.max_concurrent = other.defaults.max_concurrent;
        }
        if other.defaults.step_timeout.is_some() {
            self.defaults.step_timeout = other.defaults.step_timeout;
        }
        if other.defaults.allow_duplicate_ids.is_some() {
            self.defaults.allow_duplicate_ids = other.defaults.allow_duplicate_ids;
        }
        if other.defaults.command_wrapper.is_some() {
            self.defaults.command_wrapper = other.defaults.command_wrapper;
        }
        if other.defaults.log_file.is_some() {
            self.defaults.log_file = other.defaults.log_file;
        }
    }
}

/// Load a workflow by path or name
///
/// Search order (first match wins):
/// 1. `name` as a path to an existing file
/// 2. .dagrun/workflows/{name}.toml (project)
/// 3. ~/.config/dagrun/workflows/{name}.toml (user)
pub fn load_workflow(name: &str, project_dir: Option<&Path>) -> Result<WorkflowConfig> {
    let direct = Path::new(name);
    if direct.is_file() {
        return load_workflow_file(direct);
    }

    let filename = format!("{}.toml", name);

    let project_path = project_dir
        .map(|p| p.join(".dagrun/workflows").join(&filename))
        .unwrap_or_else(|| PathBuf::from(".dagrun/workflows").join(&filename));

    if project_path.exists() {
        return load_workflow_file(&project_path);
    }

    if let Some(user_dir) = dirs::config_dir() {
        let user_path = user_dir.join("dagrun/workflows").join(&filename);
        if user_path.exists() {
            return load_workflow_file(&user_path);
        }
    }

    anyhow::bail!("workflow '{}' not found", name)
}

/// Parse a workflow file and lint its fields
pub fn load_workflow_file(path: &Path) -> Result<WorkflowConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let workflow: WorkflowConfig = toml::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;

    workflow.lint().map_err(|errors| {
        anyhow::anyhow!("workflow lint failed:\n  {}", errors.join("\n  "))
    })?;

    Ok(workflow)
}
