//! Built-in step actions used by the CLI

use super::runner::StepRunner;
use super::step::Step;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Runs `shell`, `echo` and `sleep` steps
#[derive(Debug, Clone)]
pub struct BuiltinRunner {
    working_dir: PathBuf,
    command_wrapper: Option<String>,
}

impl BuiltinRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            command_wrapper: None,
        }
    }

    /// Wrap shell commands, e.g. `nix-shell --run`
    pub fn with_command_wrapper(mut self, wrapper: Option<String>) -> Self {
        self.command_wrapper = wrapper;
        self
    }

    async fn run_shell(&self, step: &Step) -> Result<Value> {
        let command = step
            .input_str("run")
            .ok_or_else(|| anyhow!("shell step '{}' missing string input 'run'", step.id))?;

        let command = match self.command_wrapper {
            Some(ref wrapper) => format!("{} {}", wrapper, shell_quote(command)),
            None => command.to_string(),
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &step.inputs {
            cmd.env(env_key(key), env_value(value));
        }
        cmd.env("DAGRUN_STEP_ID", &step.id);

        let start = Instant::now();
        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to spawn shell for step '{}'", step.id))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        let exit_code = exit_code(&output.status);
        tracing::debug!(
            step = %step.id,
            exit_code = ?exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "Shell command finished"
        );

        if !output.status.success() {
            if stderr.is_empty() {
                match exit_code {
                    Some(code) => bail!("command exited with code {}", code),
                    None => bail!("command terminated without an exit code"),
                }
            }
            bail!("{}", stderr);
        }

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        }))
    }

    fn run_echo(&self, step: &Step) -> Result<Value> {
        Ok(match step.inputs.get("message") {
            Some(message) => message.clone(),
            None => serde_json::to_value(&step.inputs)?,
        })
    }

    async fn run_sleep(&self, step: &Step) -> Result<Value> {
        let ms = step
            .inputs
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("sleep step '{}' missing integer input 'ms'", step.id))?;

        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }
}

#[async_trait]
impl StepRunner for BuiltinRunner {
    async fn run(&self, step: &Step) -> Result<Value> {
        match step.action.as_str() {
            "shell" => self.run_shell(step).await,
            "echo" => self.run_echo(step),
            "sleep" => self.run_sleep(step).await,
            other => bail!("unknown action '{}'", other),
        }
    }
}

/// `DAGRUN_INPUT_<KEY>`, uppercased with non-alphanumerics as `_`
fn env_key(key: &str) -> String {
    let key: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("DAGRUN_INPUT_{}", key)
}

fn env_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Exit code, or 128 + signal for a child killed by a signal
fn exit_code(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|signal| 128 + signal))
    }
    #[cfg(not(unix))]
    {
        status.code()
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
