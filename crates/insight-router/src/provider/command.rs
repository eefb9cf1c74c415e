//! Provider backed by an external command.

use std::process::Stdio;

use async_trait::async_trait;
use insight_types::ProviderSettings;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{InvocationParams, ModelProvider};
use crate::error::ProviderError;

/// Runs a configured executable per call: the prompt goes to stdin, the
/// answer is read from stdout.
///
/// The model id and parameters are exported as `INSIGHT_MODEL_ID`,
/// `INSIGHT_MAX_TOKENS` and `INSIGHT_TEMPERATURE`. The child is killed if
/// the call is dropped, e.g. on timeout.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from settings; `None` if no command is configured.
    pub fn from_settings(settings: &ProviderSettings) -> Option<Self> {
        settings
            .command
            .as_ref()
            .map(|program| Self::new(program.clone(), settings.args.clone()))
    }
}

#[async_trait]
impl ModelProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.program
    }

    async fn invoke(
        &self,
        prompt: &str,
        model_id: &str,
        params: &InvocationParams,
    ) -> Result<String, ProviderError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("INSIGHT_MODEL_ID", model_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(max_tokens) = params.max_tokens {
            command.env("INSIGHT_MAX_TOKENS", max_tokens.to_string());
        }
        if let Some(temperature) = params.temperature {
            command.env("INSIGHT_TEMPERATURE", temperature.to_string());
        }

        let mut child = command.spawn()?;
        // Feed stdin concurrently so a chatty child cannot fill stdout and stall.
        let writer = child.stdin.take().map(|mut stdin| {
            let bytes = prompt.as_bytes().to_vec();
            tokio::spawn(async move { stdin.write_all(&bytes).await })
        });
        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The child may exit without reading all of stdin.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => return Err(ProviderError::Failed(e.to_string())),
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let answer = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if answer.is_empty() {
            return Err(ProviderError::Failed(format!(
                "{} produced no output",
                self.program
            )));
        }
        debug!(program = %self.program, bytes = answer.len(), "Command provider answered");
        Ok(answer)
    }
}
