//! Sub-process backend
//!
//! Runs a shell command per task. The rendered prompt is written to the
//! command's stdin and the template, task, input, and context are exported
//! as `SWARM_*` environment variables. Stdout is the task output; a non-zero
//! exit is an execution failure carrying stderr.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Invoker, render_prompt};
use crate::templates::BehaviorTemplate;
use crate::{Error, Result};

pub struct CommandInvoker {
    command: String,
    shell: String,
}

impl CommandInvoker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: "sh".to_string(),
        }
    }

    /// Use a different shell than `sh`
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Invoker for CommandInvoker {
    fn name(&self) -> &str {
        "command"
    }

    async fn invoke(
        &self,
        template: &BehaviorTemplate,
        task: &str,
        input: Option<&str>,
        context: Option<&JsonValue>,
    ) -> Result<String> {
        let context_json = match context {
            Some(c) => serde_json::to_string(c)?,
            None => String::new(),
        };

        tracing::debug!(
            command = %self.command,
            template_id = %template.id,
            "Spawning task command"
        );

        // kill_on_drop: a timed-out worker drops this future and must take the child with it
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .env("SWARM_TEMPLATE_ID", &template.id)
            .env("SWARM_TEMPLATE_INSTRUCTIONS", &template.instructions)
            .env("SWARM_TASK", task)
            .env("SWARM_INPUT", input.unwrap_or(""))
            .env("SWARM_CONTEXT", &context_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Invocation(format!("Failed to spawn command: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = render_prompt(task, input, context);
            // A command that ignores stdin may close it early; that is not a failure
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                tracing::debug!(error = %e, "Command closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Invocation(format!("Failed to wait for command: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();

        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(Error::Invocation(format!(
                "Command exited with {}: {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                if stderr.is_empty() { stdout } else { stderr }
            )))
        }
    }
}
