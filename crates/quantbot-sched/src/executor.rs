//! Job execution: spawns the job command as a child process.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use quantbot_types::{ErrorCode, ExecutionResult, JobDefinition};

/// Ceiling on a single job run. Timeout is the only cancellation path.
pub const MAX_RUN_SECS: u64 = 3600;

/// Maximum captured output size in characters before truncation.
const MAX_OUTPUT_CHARS: usize = 200_000;

/// Executes a job's command. Seam for stubbing execution in tests.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run(&self, job: &JobDefinition, now: DateTime<Utc>) -> ExecutionResult;
}

/// Production executor: argv-split command, child process, timeout.
///
/// The persisted schema keeps a single command string for
/// compatibility, but execution splits it into argv and spawns the
/// program directly rather than going through a shell.
pub struct ProcessExecutor {
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(working_dir: Option<PathBuf>) -> Self {
        Self {
            working_dir,
            timeout: Duration::from_secs(MAX_RUN_SECS),
        }
    }

    /// Override the run ceiling (tests).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl JobExecutor for ProcessExecutor {
    async fn run(&self, job: &JobDefinition, _now: DateTime<Utc>) -> ExecutionResult {
        let command = job.command.trim();
        if command.is_empty() {
            return ExecutionResult::failed(ErrorCode::NoCommand, None);
        }

        let argv = match shell_words::split(command) {
            Ok(argv) => argv,
            Err(e) => {
                return ExecutionResult::failed(
                    ErrorCode::ExecutionError,
                    Some(format!("Unparseable command: {e}")),
                );
            }
        };
        let Some((program, args)) = argv.split_first() else {
            return ExecutionResult::failed(ErrorCode::NoCommand, None);
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        // Dropping the output future on timeout must reap the child.
        cmd.kill_on_drop(true);

        debug!(job_id = %job.id, program = %program, "Spawning job command");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionResult::failed(
                    ErrorCode::ExecutionError,
                    Some(format!("Command execution failed: {e}")),
                );
            }
            Err(_) => {
                return ExecutionResult::failed(
                    ErrorCode::Timeout,
                    Some(format!(
                        "Command timed out after {}s",
                        self.timeout.as_secs()
                    )),
                );
            }
        };

        let return_code = output.status.code().unwrap_or(-1);
        let stdout = truncate(String::from_utf8_lossy(&output.stdout).to_string());
        let stderr = truncate(String::from_utf8_lossy(&output.stderr).to_string());
        ExecutionResult::completed(return_code, stdout, stderr)
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_OUTPUT_CHARS {
        text.truncate(MAX_OUTPUT_CHARS);
        text.push_str("\n... [output truncated]");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(command: &str) -> JobDefinition {
        JobDefinition {
            id: "job".to_string(),
            enabled: true,
            command: command.to_string(),
            weekday: None,
            hour: None,
            minute: None,
            run_always: false,
            required_level: None,
        }
    }

    #[tokio::test]
    async fn test_empty_command_is_no_command() {
        let exec = ProcessExecutor::new(None);
        let result = exec.run(&job("   "), Utc::now()).await;
        assert!(!result.ok);
        assert_eq!(result.return_code, -1);
        assert_eq!(result.error_code(), Some(ErrorCode::NoCommand));
    }

    #[tokio::test]
    async fn test_successful_command_captures_stdout() {
        let exec = ProcessExecutor::new(None);
        let result = exec.run(&job("echo hello"), Utc::now()).await;
        assert!(result.ok);
        assert_eq!(result.return_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_but_not_an_error() {
        let exec = ProcessExecutor::new(None);
        let result = exec.run(&job("sh -c \"exit 2\""), Utc::now()).await;
        assert!(!result.ok);
        assert_eq!(result.return_code, 2);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_execution_error() {
        let exec = ProcessExecutor::new(None);
        let result = exec
            .run(&job("definitely-not-a-real-binary-3141"), Utc::now())
            .await;
        assert!(!result.ok);
        assert_eq!(result.return_code, -1);
        assert_eq!(result.error_code(), Some(ErrorCode::ExecutionError));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_classifies() {
        let exec = ProcessExecutor::new(None).with_timeout(Duration::from_millis(100));
        let result = exec.run(&job("sleep 5"), Utc::now()).await;
        assert!(!result.ok);
        assert_eq!(result.return_code, -1);
        assert_eq!(result.error_code(), Some(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn test_working_dir_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ProcessExecutor::new(Some(dir.path().to_path_buf()));
        let result = exec.run(&job("pwd"), Utc::now()).await;
        assert!(result.ok);
        let reported = std::path::Path::new(result.stdout.trim()).canonicalize().unwrap();
        assert_eq!(reported, dir.path().canonicalize().unwrap());
    }
}
