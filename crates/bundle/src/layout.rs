use clone_core::{ArchivedLog, ConsistencyWindow, MetadataBundle};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BundleError, Result};

pub const PARAMETER_FILE: &str = "init.ora";
pub const CONTROLFILE_SCRIPT: &str = "control.sql";
pub const INVENTORY_FILE: &str = "inventory.txt";
pub const STATE_FILE: &str = "capture.json";
pub const ARCHIVE_DIR: &str = "arch";

/// Progress recorded between separately invoked source-side stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureState {
    pub source_sid: String,
    pub window: Option<ConsistencyWindow>,
    #[serde(default)]
    pub archived_logs: Vec<ArchivedLog>,
    /// Source is currently held in backup mode by this capture.
    #[serde(default)]
    pub backup_active: bool,
}

impl CaptureState {
    pub fn new(source_sid: impl Into<String>) -> Self {
        Self {
            source_sid: source_sid.into(),
            window: None,
            archived_logs: Vec::new(),
            backup_active: false,
        }
    }
}

/// Directory layout of one capture, on either host.
#[derive(Debug, Clone)]
pub struct CaptureArea {
    root: PathBuf,
}

impl CaptureArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory tree.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let area = Self::new(root);
        fs::create_dir_all(area.archive_dir())?;
        Ok(area)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn parameter_file(&self) -> PathBuf {
        self.root.join(PARAMETER_FILE)
    }

    pub fn controlfile_script(&self) -> PathBuf {
        self.root.join(CONTROLFILE_SCRIPT)
    }

    pub fn inventory_file(&self) -> PathBuf {
        self.root.join(INVENTORY_FILE)
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    pub fn archived_log_path(&self, log: &ArchivedLog) -> PathBuf {
        self.archive_dir().join(&log.file_name)
    }

    pub fn write_state(&self, state: &CaptureState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.state_file().with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.state_file())?;
        Ok(())
    }

    pub fn read_state(&self) -> Result<CaptureState> {
        let path = self.state_file();
        if !path.exists() {
            return Err(BundleError::missing_file(STATE_FILE));
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    pub fn write_inventory(&self, entries: &[String]) -> Result<()> {
        let mut text = entries.join("\n");
        text.push('\n');
        fs::write(self.inventory_file(), text)?;
        Ok(())
    }

    fn read_text(&self, path: &Path, name: &str) -> Result<String> {
        if !path.exists() {
            return Err(BundleError::missing_file(name));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Assemble the immutable metadata bundle from a completed capture.
    pub fn load_bundle(&self) -> Result<MetadataBundle> {
        let state = self.read_state()?;
        let window = state.window.ok_or_else(|| {
            BundleError::InvalidBundle("capture has no consistency window".to_string())
        })?;

        for log in &state.archived_logs {
            if !self.archived_log_path(log).exists() {
                return Err(BundleError::missing_file(format!(
                    "{}/{}",
                    ARCHIVE_DIR, log.file_name
                )));
            }
        }

        let parameter_text = self.read_text(&self.parameter_file(), PARAMETER_FILE)?;
        let controlfile_script = self.read_text(&self.controlfile_script(), CONTROLFILE_SCRIPT)?;
        let inventory = if self.inventory_file().exists() {
            fs::read_to_string(self.inventory_file())?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        Ok(MetadataBundle::new(
            state.source_sid,
            parameter_text,
            controlfile_script,
            inventory,
            state.archived_logs,
            window,
        )?)
    }
}
