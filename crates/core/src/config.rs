use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::WindowMode;
use crate::error::{CoreError, Result};

const DEFAULT_SGA_TARGET_MB: u64 = 512;
const DEFAULT_PGA_TARGET_MB: u64 = 256;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_ASM_SID: &str = "+ASM";
const DEFAULT_ORACLE_BASE: &str = "/u01/app/oracle";
const DEFAULT_REMOTE_DIR: &str = "/tmp";

fn default_sga_target_mb() -> u64 {
    DEFAULT_SGA_TARGET_MB
}

fn default_pga_target_mb() -> u64 {
    DEFAULT_PGA_TARGET_MB
}

fn default_remote_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT_SECS
}

fn default_asm_sid() -> String {
    DEFAULT_ASM_SID.to_string()
}

fn default_oracle_base() -> PathBuf {
    PathBuf::from(DEFAULT_ORACLE_BASE)
}

fn default_remote_dir() -> PathBuf {
    PathBuf::from(DEFAULT_REMOTE_DIR)
}

fn default_true() -> bool {
    true
}

/// Options recognized for a clone run.
///
/// Loaded from a TOML file and overridden by command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloneConfig {
    /// Host running the source database; `None` when it is local.
    #[serde(default)]
    pub source_host: Option<String>,
    #[serde(default)]
    pub source_sid: String,
    #[serde(default)]
    pub target_sid: String,
    /// Storage snapshot executable, run without arguments.
    #[serde(default)]
    pub snapshot_command: Option<String>,
    #[serde(default)]
    pub source_home: Option<PathBuf>,
    #[serde(default)]
    pub target_home: Option<PathBuf>,
    /// Grid infrastructure home used for the storage-administration channel.
    #[serde(default)]
    pub grid_home: Option<PathBuf>,
    /// Existing control-file trace used instead of generating one.
    #[serde(default)]
    pub controlfile_backup: Option<PathBuf>,

    /// Data destination. Defaults to the renamed pool of the first datafile.
    #[serde(default)]
    pub data_dest: Option<String>,
    #[serde(default)]
    pub redo_dest: Option<String>,
    #[serde(default)]
    pub temp_dest: Option<String>,
    #[serde(default)]
    pub archive_dest: Option<String>,
    /// Size clause for recreated tempfiles, e.g. `2G`.
    #[serde(default)]
    pub tempfile_size: Option<String>,

    #[serde(default = "default_sga_target_mb")]
    pub sga_target_mb: u64,
    #[serde(default = "default_pga_target_mb")]
    pub pga_target_mb: u64,

    #[serde(default)]
    pub mode: WindowMode,
    /// Prefix for renamed storage pools. Defaults to the target identifier.
    #[serde(default)]
    pub pool_prefix: Option<String>,
    #[serde(default = "default_oracle_base")]
    pub oracle_base: PathBuf,
    #[serde(default)]
    pub audit_dest: Option<PathBuf>,
    #[serde(default = "default_asm_sid")]
    pub asm_sid: String,

    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    #[serde(default = "default_remote_dir")]
    pub remote_dir: PathBuf,
    /// Persistent staging area shared by separately invoked stages.
    #[serde(default)]
    pub stage_dir: Option<PathBuf>,

    /// Keep the scratch area for inspection instead of deleting it.
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_true")]
    pub start_after_create: bool,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            source_host: None,
            source_sid: String::new(),
            target_sid: String::new(),
            snapshot_command: None,
            source_home: None,
            target_home: None,
            grid_home: None,
            controlfile_backup: None,
            data_dest: None,
            redo_dest: None,
            temp_dest: None,
            archive_dest: None,
            tempfile_size: None,
            sga_target_mb: DEFAULT_SGA_TARGET_MB,
            pga_target_mb: DEFAULT_PGA_TARGET_MB,
            mode: WindowMode::default(),
            pool_prefix: None,
            oracle_base: default_oracle_base(),
            audit_dest: None,
            asm_sid: default_asm_sid(),
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            remote_dir: default_remote_dir(),
            stage_dir: None,
            debug: false,
            start_after_create: true,
        }
    }
}

impl CloneConfig {
    pub fn new(source_sid: impl Into<String>, target_sid: impl Into<String>) -> Self {
        Self {
            source_sid: source_sid.into(),
            target_sid: target_sid.into(),
            ..Default::default()
        }
    }

    /// Checks shared by every stage.
    pub fn validate(&self) -> Result<()> {
        if self.source_sid.trim().is_empty() {
            return Err(CoreError::InvalidConfig("source identifier is required".into()));
        }
        if self.target_sid.trim().is_empty() {
            return Err(CoreError::InvalidConfig("target identifier is required".into()));
        }
        if self.source_sid.eq_ignore_ascii_case(&self.target_sid) {
            return Err(CoreError::InvalidConfig(format!(
                "source and target must not share the identifier '{}'",
                self.source_sid
            )));
        }
        if self.sga_target_mb == 0 || self.pga_target_mb == 0 {
            return Err(CoreError::InvalidConfig(
                "memory budgets must be greater than zero".into(),
            ));
        }
        if self.remote_timeout_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "remote timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Stages that take the storage snapshot additionally need the command.
    pub fn validate_for_snapshot(&self) -> Result<()> {
        self.validate()?;
        match self.snapshot_command.as_deref().map(str::trim) {
            Some(cmd) if !cmd.is_empty() => Ok(()),
            _ => Err(CoreError::InvalidConfig("snapshot command is required".into())),
        }
    }

    pub fn pool_prefix(&self) -> String {
        self.pool_prefix
            .clone()
            .unwrap_or_else(|| self.target_sid.clone())
            .to_ascii_uppercase()
    }

    pub fn audit_dest(&self) -> PathBuf {
        self.audit_dest.clone().unwrap_or_else(|| {
            self.oracle_base
                .join("admin")
                .join(&self.target_sid)
                .join("adump")
        })
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

/// Explicit per-run context handed to every component.
#[derive(Debug, Clone)]
pub struct CloneContext {
    pub config: CloneConfig,
    pub run_id: Uuid,
    /// Scratch or staging directory owned by this run.
    pub work_dir: PathBuf,
}

impl CloneContext {
    pub fn new(config: CloneConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            run_id: Uuid::new_v4(),
            work_dir: work_dir.into(),
        }
    }

    pub fn work_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.work_dir.join(name)
    }

    /// Short run tag used in remote file names.
    pub fn run_tag(&self) -> String {
        self.run_id.simple().to_string()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CloneConfig::new("ORCL", "COPY");
        assert_eq!(config.sga_target_mb, 512);
        assert_eq!(config.pga_target_mb, 256);
        assert_eq!(config.remote_timeout(), Duration::from_secs(300));
        assert_eq!(config.pool_prefix(), "COPY");
        assert_eq!(config.mode, WindowMode::Hot);
        assert!(config.start_after_create);
        assert_eq!(
            config.audit_dest(),
            PathBuf::from("/u01/app/oracle/admin/COPY/adump")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_shared_identifier() {
        let config = CloneConfig::new("ORCL", "orcl");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(CloneConfig::new("", "COPY").validate().is_err());
        assert!(CloneConfig::new("ORCL", " ").validate().is_err());
    }

    #[test]
    fn test_validate_for_snapshot() {
        let mut config = CloneConfig::new("ORCL", "COPY");
        assert!(config.validate_for_snapshot().is_err());
        config.snapshot_command = Some("/usr/local/bin/snap-create".to_string());
        assert!(config.validate_for_snapshot().is_ok());
    }

    #[test]
    fn test_toml_partial_config() {
        let config: CloneConfig = toml::from_str(
            r#"
            source_sid = "ORCL"
            target_sid = "COPY"
            mode = "cold"
            pool_prefix = "clone"
            sga_target_mb = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, WindowMode::Cold);
        assert_eq!(config.pool_prefix(), "CLONE");
        assert_eq!(config.sga_target_mb, 1024);
        assert_eq!(config.pga_target_mb, 256);
        assert_eq!(config.asm_sid, "+ASM");
    }

    #[test]
    fn test_context_paths() {
        let ctx = CloneContext::new(CloneConfig::new("ORCL", "COPY"), "/tmp/run");
        assert_eq!(ctx.work_path("init.ora"), PathBuf::from("/tmp/run/init.ora"));
        assert_eq!(ctx.run_tag().len(), 8);
    }
}
