use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::command::{CommandOutput, CommandRunner};
use crate::error::{ChannelError, Result};

const SSH_OPTIONS: [&str; 4] = ["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=yes"];

/// Secure copy and execution against one remote host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    fn host(&self) -> &str;

    async fn push(&self, local: &Path, remote_path: &str) -> Result<()>;

    /// Run a command remotely; the caller bounds the wall-clock time.
    async fn exec(&self, args: &[String]) -> Result<CommandOutput>;

    async fn pull(&self, remote_path: &str, local: &Path) -> Result<()>;
}

/// Quote one argument for a POSIX shell on the remote side.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// [`RemoteShell`] over `ssh`/`scp` with non-interactive authentication.
pub struct SshRemote {
    host: String,
    runner: Arc<dyn CommandRunner>,
}

impl SshRemote {
    pub fn new(host: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            host: host.into(),
            runner,
        }
    }

    fn options() -> Vec<String> {
        SSH_OPTIONS.iter().map(|s| s.to_string()).collect()
    }

    fn local_str(path: &Path) -> Result<String> {
        path.to_str()
            .map(str::to_string)
            .ok_or_else(|| ChannelError::InvalidPath(path.display().to_string()))
    }
}

#[async_trait]
impl RemoteShell for SshRemote {
    fn host(&self) -> &str {
        &self.host
    }

    async fn push(&self, local: &Path, remote_path: &str) -> Result<()> {
        debug!(host = %self.host, "scp {} -> {}", local.display(), remote_path);
        let mut args = Self::options();
        args.push("-p".to_string());
        args.push(Self::local_str(local)?);
        args.push(format!("{}:{}", self.host, remote_path));
        self.runner.run("scp", &args, &[]).await?.check("scp push")?;
        Ok(())
    }

    async fn exec(&self, args: &[String]) -> Result<CommandOutput> {
        let remote_command = args
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ");
        debug!(host = %self.host, "ssh {}", remote_command);
        let mut ssh_args = Self::options();
        ssh_args.push(self.host.clone());
        ssh_args.push(remote_command);
        self.runner.run("ssh", &ssh_args, &[]).await
    }

    async fn pull(&self, remote_path: &str, local: &Path) -> Result<()> {
        debug!(host = %self.host, "scp {} <- {}", local.display(), remote_path);
        let mut args = Self::options();
        args.push(format!("{}:{}", self.host, remote_path));
        args.push(Self::local_str(local)?);
        self.runner.run("scp", &args, &[]).await?.check("scp pull")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("/tmp/snapclone-1a2b"), "/tmp/snapclone-1a2b");
        assert_eq!(shell_quote("--source-sid=ORCL"), "--source-sid=ORCL");
    }

    #[test]
    fn test_shell_quote_special() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }
}
