use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::command::{CommandOutput, CommandRunner};
use crate::error::{ChannelError, Result};

/// Storage-pool utilities that operate on disks rather than through SQL.
#[async_trait]
pub trait StorageTool: Send + Sync {
    /// Pool name recorded in a disk header, `None` when the disk is not a pool member.
    async fn pool_of_disk(&self, disk: &str) -> Result<Option<String>>;

    /// Rename a pool on exactly the given member disks.
    ///
    /// Runs both phases (config generation and apply) in one invocation and
    /// leaves the generated config at `config_file`.
    async fn rename_pool(
        &self,
        from: &str,
        to: &str,
        disks: &[String],
        config_file: &Path,
    ) -> Result<CommandOutput>;

    /// Copy a file stored inside a pool to a local path.
    async fn copy_out(&self, source: &str, dest: &Path) -> Result<()>;
}

/// [`StorageTool`] using the grid infrastructure utilities (`kfed`, `renamedg`, `asmcmd`).
pub struct GridTools {
    home: Option<PathBuf>,
    asm_sid: String,
    runner: Arc<dyn CommandRunner>,
}

impl GridTools {
    pub fn new(asm_sid: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            home: None,
            asm_sid: asm_sid.into(),
            runner,
        }
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    fn tool(&self, name: &str) -> String {
        match &self.home {
            Some(home) => home.join("bin").join(name).display().to_string(),
            None => name.to_string(),
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![("ORACLE_SID".to_string(), self.asm_sid.clone())];
        if let Some(home) = &self.home {
            env.push(("ORACLE_HOME".to_string(), home.display().to_string()));
        }
        env
    }

    /// Arguments for a combined two-phase rename.
    pub fn rename_args(from: &str, to: &str, disks: &[String], config_file: &Path) -> Vec<String> {
        vec![
            "phase=both".to_string(),
            format!("dgname={}", from),
            format!("newdgname={}", to),
            format!("config={}", config_file.display()),
            format!("asm_diskstring={}", disks.join(",")),
            "verbose=true".to_string(),
        ]
    }

    /// Read the pool name out of a disk header dump.
    ///
    /// Only headers in member state count; former or candidate disks keep a
    /// stale group name that must be ignored.
    pub fn parse_header(dump: &str) -> Option<String> {
        let field = |key: &str| {
            dump.lines()
                .find(|line| line.trim_start().starts_with(key))
                .and_then(|line| line.split_once(':'))
                .map(|(_, rest)| rest.split(';').next().unwrap_or("").trim().to_string())
        };

        let is_member = dump
            .lines()
            .any(|line| line.trim_start().starts_with("kfdhdb.hdrsts:") && line.contains("KFDHDR_MEMBER"));
        if !is_member {
            return None;
        }

        field("kfdhdb.grpname:").filter(|name| !name.is_empty())
    }
}

#[async_trait]
impl StorageTool for GridTools {
    async fn pool_of_disk(&self, disk: &str) -> Result<Option<String>> {
        let output = self
            .runner
            .run(&self.tool("kfed"), &["read".to_string(), disk.to_string()], &self.env())
            .await?
            .check("kfed read")?;
        let pool = Self::parse_header(&output.stdout);
        debug!(disk = %disk, pool = ?pool, "Read disk header");
        Ok(pool)
    }

    async fn rename_pool(
        &self,
        from: &str,
        to: &str,
        disks: &[String],
        config_file: &Path,
    ) -> Result<CommandOutput> {
        if disks.is_empty() {
            return Err(ChannelError::CommandFailed(format!(
                "no member disks supplied for pool {}",
                from
            )));
        }
        info!(from = %from, to = %to, disks = disks.len(), "Renaming storage pool");
        let args = Self::rename_args(from, to, disks, config_file);
        self.runner
            .run(&self.tool("renamedg"), &args, &self.env())
            .await?
            .check("renamedg")
    }

    async fn copy_out(&self, source: &str, dest: &Path) -> Result<()> {
        let dest = dest
            .to_str()
            .ok_or_else(|| ChannelError::InvalidPath(dest.display().to_string()))?;
        self.runner
            .run(
                &self.tool("asmcmd"),
                &["cp".to_string(), source.to_string(), dest.to_string()],
                &self.env(),
            )
            .await?
            .check("asmcmd cp")?;
        Ok(())
    }
}
