//! Subprocess model backend.
//!
//! Runs a local command (e.g. `ollama run llama3` or `fabric -p raw_query`),
//! writes the system instruction and prompt to stdin, and reads the answer
//! from stdout. The child is killed if the call is cancelled.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::LanguageModel;
use crate::protocol::ModelRequest;

/// Model backend that shells out to a command
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl CommandModel {
    /// Build from a whitespace-separated command line.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().context("Model command is empty")?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl LanguageModel for CommandModel {
    fn name(&self) -> &str {
        &self.program
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn model command '{}'", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = format!("{}\n\n{}", request.system, request.prompt);
            stdin
                .write_all(input.as_bytes())
                .await
                .context("Failed to write prompt to model stdin")?;
            // Drop stdin to signal EOF
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for model command '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Model command '{}' failed with exit code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("Model output is not valid UTF-8")?;
        debug!(bytes = stdout.len(), "Model command finished");
        Ok(stdout)
    }

    async fn health_check(&self) -> Result<()> {
        which(&self.program)
            .then_some(())
            .with_context(|| format!("Model command '{}' not found on PATH", self.program))
    }
}

fn which(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return std::path::Path::new(program).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
