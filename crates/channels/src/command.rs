use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ChannelError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into a `CommandFailed` error.
    pub fn check(self, what: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ChannelError::CommandFailed(format!(
                "{} exited with {}: {}",
                what,
                self.exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                self.stderr.trim()
            )))
        }
    }
}

/// Runs local executables.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<CommandOutput> {
        debug!("Running {} {:?}", program, args);

        let output = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ChannelError::CommandNotFound(program.to_string()),
                _ => ChannelError::Io(e),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_failure_message() {
        let err = CommandOutput::failed(3, "disk busy\n")
            .check("snapshot")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("snapshot exited with 3"));
        assert!(msg.contains("disk busy"));
    }

    #[test]
    fn test_check_success() {
        assert!(CommandOutput::ok("done").check("snapshot").is_ok());
    }

    #[tokio::test]
    async fn test_run_captures_exit_code() {
        let runner = ProcessRunner::new();
        let args = ["-c".to_string(), "echo hello; exit 4".to_string()];
        let output = runner.run("sh", &args, &[]).await.unwrap();
        assert_eq!(output.exit_code, Some(4));
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = ProcessRunner::new();
        let result = runner
            .run("definitely-not-a-real-binary-name", &[], &[])
            .await;
        assert!(matches!(result, Err(ChannelError::CommandNotFound(_))));
    }
}
