use async_trait::async_trait;
use queuectl_core::{ExecutionOutcome, Job};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Failure output recorded when a command exceeds its time limit
pub const TIMEOUT_MESSAGE: &str = "execution timeout";

/// Runs a job command to an outcome. Never fails: spawn errors and
/// timeouts are reported as `ExecutionOutcome::Failure`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, limit: Duration) -> ExecutionOutcome;
}

/// Runs commands through the platform shell
pub struct ShellCommandRunner;

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str, limit: Duration) -> ExecutionOutcome {
        let mut cmd = shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExecutionOutcome::Failure(format!("Execution error: {}", e)),
        };

        // Dropping the output future on timeout kills the child
        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let success = output.status.success();
                let stream = if success { &output.stdout } else { &output.stderr };
                let mut text = String::from_utf8_lossy(stream).trim().to_string();

                if text.is_empty() {
                    text = match output.status.code() {
                        Some(code) => format!("Exit code: {}", code),
                        None => "Terminated by signal".to_string(),
                    };
                }

                if success {
                    ExecutionOutcome::Success(text)
                } else {
                    ExecutionOutcome::Failure(text)
                }
            }
            Ok(Err(e)) => ExecutionOutcome::Failure(format!("Execution error: {}", e)),
            Err(_) => ExecutionOutcome::Failure(TIMEOUT_MESSAGE.to_string()),
        }
    }
}

/// Job executor with timeout support
pub struct JobExecutor {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl JobExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        JobExecutor { runner, timeout }
    }

    pub async fn execute(&self, job: &Job) -> ExecutionOutcome {
        info!("Executing job {} (attempt {}): {}", job.id, job.attempts + 1, job.command);
        let started = Instant::now();

        let outcome = self.runner.run(&job.command, self.timeout).await;
        let elapsed = started.elapsed();

        match &outcome {
            ExecutionOutcome::Success(_) => {
                info!("Job {} succeeded in {:?}", job.id, elapsed);
            }
            _ if self.is_timeout(&outcome, elapsed) => {
                error!("Job {} timed out after {:?}", job.id, self.timeout);
            }
            ExecutionOutcome::Failure(reason) => {
                warn!("Job {} failed in {:?}: {}", job.id, elapsed, reason);
            }
        }

        outcome
    }

    /// A command that prints the timeout message itself is still an
    /// ordinary failure: the time limit must also have been used up.
    fn is_timeout(&self, outcome: &ExecutionOutcome, elapsed: Duration) -> bool {
        matches!(outcome, ExecutionOutcome::Failure(reason) if reason == TIMEOUT_MESSAGE)
            && elapsed >= self.timeout
    }
}
