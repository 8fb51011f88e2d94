//! Shell command step bodies
//!
//! A command step runs `sh -c <command>` with the node's inputs written to
//! stdin as a JSON object. If the process prints a JSON object of the form
//! `{"outputs": {...}, "metrics": {...}}` on stdout, those become the step's
//! outputs and metrics; empty stdout means no outputs.

use crate::core::{
    context::StepContext,
    error::StepError,
    step::{StepBody, StepOutput},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default per-attempt timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Runs a shell command as a step body
#[derive(Debug, Clone)]
pub struct CommandStep {
    command: String,
    timeout_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct CommandOutput {
    #[serde(default)]
    outputs: BTreeMap<String, Value>,
    #[serde(default)]
    metrics: Map<String, Value>,
}

impl CommandStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Replace `{{ inputs.<name> }}`, `{{ run_id }}`, `{{ node_id }}` and
    /// `{{ attempt }}` placeholders.
    ///
    /// Input values are shell-quoted unless they are a single plain word, so
    /// a value can never add arguments or commands. Steps that need the
    /// exact structure of an input should read the JSON on stdin instead.
    pub fn render(&self, ctx: &StepContext, inputs: &BTreeMap<String, Value>) -> String {
        let mut command = self
            .command
            .replace("{{ run_id }}", &ctx.run_id.to_string())
            .replace("{{ node_id }}", &ctx.node_id)
            .replace("{{ attempt }}", &ctx.attempt.to_string());

        for (name, value) in inputs {
            let placeholder = format!("{{{{ inputs.{} }}}}", name);
            let rendered = match value {
                Value::String(s) => shell_quote(s),
                other => shell_quote(&other.to_string()),
            };
            command = command.replace(&placeholder, &rendered);
        }

        command
    }
}

/// Quote `value` for `sh` unless it is a non-empty plain word
fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.,:/=+@%".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

fn parse_output(stdout: &str) -> Result<StepOutput, StepError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(StepOutput::new());
    }

    let parsed: CommandOutput = serde_json::from_str(trimmed)
        .map_err(|e| StepError::Failed(format!("invalid command output: {}", e)))?;

    Ok(StepOutput {
        outputs: parsed.outputs,
        metrics: parsed.metrics.into_iter().collect(),
    })
}

#[async_trait]
impl StepBody for CommandStep {
    async fn invoke(
        &self,
        ctx: &StepContext,
        inputs: BTreeMap<String, Value>,
    ) -> Result<StepOutput, StepError> {
        let command = self.render(ctx, &inputs);
        debug!("Running command for {}: {}", ctx.node_id, command);

        let payload = serde_json::to_vec(&inputs)
            .map_err(|e| StepError::Failed(format!("failed to encode inputs: {}", e)))?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .env("ORCHESTRA_RUN_ID", ctx.run_id.to_string())
            .env("ORCHESTRA_NODE_ID", &ctx.node_id)
            .env("ORCHESTRA_ATTEMPT", ctx.attempt.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StepError::Failed(format!("failed to spawn command: {}", e)))?;

        // written from its own task so a command that never reads stdin
        // cannot hold the attempt past its timeout
        let writer = child.stdin.take().map(|mut stdin| {
            let node_id = ctx.node_id.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!("Command for {} did not read its inputs: {}", node_id, e);
                }
            })
        });

        let result = timeout(Duration::from_secs(self.timeout_secs), child.wait_with_output()).await;
        if let Some(writer) = writer {
            writer.abort();
        }
        let output = result
            .map_err(|_| StepError::Timeout(self.timeout_secs))?
            .map_err(|e| StepError::Failed(format!("failed to run command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("Command for {} exited with code {}: {}", ctx.node_id, exit_code, stderr.trim());
            return Err(StepError::Failed(format!(
                "command exited with code {}: {}",
                exit_code,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| StepError::Failed(format!("failed to decode command output: {}", e)))?;

        parse_output(&stdout)
    }
}
