// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Executor that runs an external analysis command per job.
//!
//! Protocol: the job payload is written to the child's stdin as JSON and
//! stdin is closed. Every stderr line becomes an `info` progress event.
//! Stdout is the result: parsed as JSON when possible, otherwise wrapped
//! as `{"output": "<text>"}`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use finsight_config::model::WorkerConfig;
use finsight_core::AnalysisJob;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::executor::{AnalysisExecutor, ExecutionError};
use crate::reporter::ProgressReporter;

pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from `worker.command`; `None` when no command is configured.
    pub fn from_config(config: &WorkerConfig) -> Option<Self> {
        let (program, args) = config.command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec(), config.command_timeout()))
    }

    async fn run(
        &self,
        job: &AnalysisJob,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, ExecutionError> {
        let input = serde_json::to_vec(&job.payload)
            .map_err(|e| ExecutionError::Permanent(format!("payload is not serializable: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("FINSIGHT_JOB_ID", &job.job_id)
            .env("FINSIGHT_SESSION_ID", &job.session_id)
            .env("FINSIGHT_MESSAGE_ID", &job.message_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::Transient(format!("failed to spawn `{}`: {e}", self.program))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Stdin is fed concurrently with draining the output pipes; a child
        // that writes before it reads would otherwise block on a full pipe.
        let write_stdin = async {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&input).await {
                    Ok(()) => {}
                    // The child may legitimately exit without reading.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                }
                // Dropping closes the pipe so the child sees EOF.
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stdout = async {
            let mut buf = String::new();
            if let Some(mut stdout) = stdout {
                stdout.read_to_string(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let forward_stderr = async {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Some(line) = lines.next_line().await? {
                    let line = line.trim();
                    if !line.is_empty() {
                        progress.info(line).await;
                    }
                }
            }
            Ok::<_, std::io::Error>(())
        };

        let (stdin, stdout, stderr) = tokio::join!(write_stdin, read_stdout, forward_stderr);
        stdin.map_err(|e| ExecutionError::Transient(format!("failed to write stdin: {e}")))?;
        let stdout =
            stdout.map_err(|e| ExecutionError::Transient(format!("failed to read stdout: {e}")))?;
        stderr.map_err(|e| ExecutionError::Transient(format!("failed to read stderr: {e}")))?;

        let status = child
            .wait()
            .await
            .map_err(|e| ExecutionError::Transient(format!("failed to wait for command: {e}")))?;
        if !status.success() {
            let code = status.code().unwrap_or(-1);
            return Err(ExecutionError::Permanent(format!(
                "analysis command exited with code {code}"
            )));
        }

        Ok(parse_output(&stdout))
    }
}

fn parse_output(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|_| serde_json::json!({ "output": stdout.trim_end() }))
}

#[async_trait]
impl AnalysisExecutor for CommandExecutor {
    fn name(&self) -> &str {
        &self.program
    }

    async fn execute(
        &self,
        job: &AnalysisJob,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, ExecutionError> {
        debug!(job_id = %job.job_id, program = %self.program, "running analysis command");
        match tokio::time::timeout(self.timeout, self.run(job, progress)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Transient(format!(
                "analysis command timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}
