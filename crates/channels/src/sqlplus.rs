use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ChannelError, Result};
use crate::sql::{SqlChannel, SqlOutput};

const SESSION_SETTINGS: &str = "set echo off feedback off heading off pagesize 0 \
linesize 32767 trimspool on trimout on verify off tab off\nwhenever sqlerror continue\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Database administration.
    Sysdba,
    /// Storage administration.
    Sysasm,
}

impl Privilege {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sysdba => "sysdba",
            Self::Sysasm => "sysasm",
        }
    }
}

/// [`SqlChannel`] that runs each script in a fresh `sqlplus` session.
#[derive(Debug, Clone)]
pub struct SqlPlus {
    sid: String,
    home: Option<PathBuf>,
    privilege: Privilege,
}

impl SqlPlus {
    pub fn new(sid: impl Into<String>, privilege: Privilege) -> Self {
        Self {
            sid: sid.into(),
            home: None,
            privilege,
        }
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    fn binary(&self) -> PathBuf {
        match &self.home {
            Some(home) => home.join("bin").join("sqlplus"),
            None => PathBuf::from("sqlplus"),
        }
    }

    /// Full script text fed to the session.
    pub fn wrap_script(script: &str) -> String {
        let mut text = String::from(SESSION_SETTINGS);
        text.push_str(script.trim_end());
        text.push_str("\nexit\n");
        text
    }
}

#[async_trait]
impl SqlChannel for SqlPlus {
    fn name(&self) -> &str {
        &self.sid
    }

    async fn execute(&self, script: &str) -> Result<SqlOutput> {
        debug!(sid = %self.sid, privilege = self.privilege.as_str(), "sql> {}", script.trim());

        let binary = self.binary();
        let connect = format!("/ as {}", self.privilege.as_str());
        let mut command = Command::new(&binary);
        command
            .args(["-S", "-L", connect.as_str()])
            .env("ORACLE_SID", &self.sid)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(home) = &self.home {
            command.env("ORACLE_HOME", home);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ChannelError::CommandNotFound(binary.display().to_string()),
            _ => ChannelError::Io(e),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(Self::wrap_script(script).as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() && stdout.trim().is_empty() {
            return Err(ChannelError::CommandFailed(format!(
                "sqlplus for {} exited with {:?}: {}",
                self.sid,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let result = SqlOutput::parse(&stdout);
        debug!(sid = %self.sid, lines = result.lines.len(), errors = result.diagnostics.len(), "sql done");
        Ok(result)
    }
}
