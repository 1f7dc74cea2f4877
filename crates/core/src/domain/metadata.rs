use serde::{Deserialize, Serialize};

use super::window::ConsistencyWindow;
use crate::error::{CoreError, Result};

/// One archived redo file shipped with the bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchivedLog {
    pub sequence: u64,
    /// File name relative to the bundle's `arch/` directory.
    pub file_name: String,
}

/// Everything captured on the source side for one clone run.
///
/// Built once after the window closes and read-only afterwards. Target-side
/// stages take it by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataBundle {
    source_sid: String,
    parameter_text: String,
    controlfile_script: String,
    disk_inventory: Vec<String>,
    archived_logs: Vec<ArchivedLog>,
    window: ConsistencyWindow,
}

impl MetadataBundle {
    pub fn new(
        source_sid: impl Into<String>,
        parameter_text: impl Into<String>,
        controlfile_script: impl Into<String>,
        disk_inventory: Vec<String>,
        mut archived_logs: Vec<ArchivedLog>,
        window: ConsistencyWindow,
    ) -> Result<Self> {
        if !window.is_closed() {
            return Err(CoreError::WindowViolation(
                "metadata bundle requires a closed window".to_string(),
            ));
        }
        if let Some(log) = archived_logs
            .iter()
            .find(|log| !window.contains_sequence(log.sequence))
        {
            return Err(CoreError::WindowViolation(format!(
                "archived log sequence {} lies outside the window",
                log.sequence
            )));
        }
        archived_logs.sort_by_key(|log| log.sequence);

        Ok(Self {
            source_sid: source_sid.into(),
            parameter_text: parameter_text.into(),
            controlfile_script: controlfile_script.into(),
            disk_inventory,
            archived_logs,
            window,
        })
    }

    pub fn source_sid(&self) -> &str {
        &self.source_sid
    }

    pub fn parameter_text(&self) -> &str {
        &self.parameter_text
    }

    pub fn controlfile_script(&self) -> &str {
        &self.controlfile_script
    }

    pub fn disk_inventory(&self) -> &[String] {
        &self.disk_inventory
    }

    /// Archived logs in ascending sequence order.
    pub fn archived_logs(&self) -> &[ArchivedLog] {
        &self.archived_logs
    }

    pub fn window(&self) -> &ConsistencyWindow {
        &self.window
    }

    pub fn recovery_target(&self) -> u64 {
        // `new` only accepts closed windows.
        self.window.recovery_target().unwrap_or(self.window.begin_change)
    }
}
