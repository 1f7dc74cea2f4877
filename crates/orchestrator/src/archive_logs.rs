use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use bundle::CaptureArea;
use channels::{SqlChannel, StorageTool};
use clone_core::{ArchivedLog, ConsistencyWindow};

use crate::error::{OrchestratorError, Result};

/// Copies the archived redo of a closed window into the capture area.
pub struct ArchiveLogCopier {
    channel: Arc<dyn SqlChannel>,
    storage: Arc<dyn StorageTool>,
}

impl ArchiveLogCopier {
    pub fn new(channel: Arc<dyn SqlChannel>, storage: Arc<dyn StorageTool>) -> Self {
        Self { channel, storage }
    }

    fn listing_sql(first: u64, last: u64) -> String {
        format!(
            "select sequence# || ' ' || name from v$archived_log \
             where sequence# between {} and {} and name is not null and deleted = 'NO' \
             order by sequence#;",
            first, last
        )
    }

    /// Archived log files for the window's sequence range, one per sequence.
    pub async fn list(&self, window: &ConsistencyWindow) -> Result<BTreeMap<u64, String>> {
        let range = window.sequence_range().ok_or_else(|| {
            OrchestratorError::ArchiveLogs("window is not closed".to_string())
        })?;
        let output = self
            .channel
            .execute_checked(&Self::listing_sql(*range.start(), *range.end()))
            .await?;

        let mut logs = BTreeMap::new();
        for row in output.rows() {
            let Some((sequence, name)) = row.trim().split_once(' ') else {
                continue;
            };
            let Ok(sequence) = sequence.parse::<u64>() else {
                continue;
            };
            if range.contains(&sequence) {
                logs.entry(sequence).or_insert_with(|| name.trim().to_string());
            }
        }

        if let Some(missing) = range.clone().find(|s| !logs.contains_key(s)) {
            return Err(OrchestratorError::ArchiveLogs(format!(
                "sequence {} has no archived copy",
                missing
            )));
        }
        Ok(logs)
    }

    pub async fn copy(
        &self,
        window: &ConsistencyWindow,
        area: &CaptureArea,
    ) -> Result<Vec<ArchivedLog>> {
        let logs = self.list(window).await?;
        let mut copied = Vec::with_capacity(logs.len());

        for (sequence, source) in logs {
            let log = ArchivedLog {
                sequence,
                file_name: format!("arch_{}.arc", sequence),
            };
            let dest = area.archived_log_path(&log);
            debug!(sequence, source = %source, "Copying archived log");

            if source.starts_with('+') {
                self.storage.copy_out(&source, &dest).await?;
            } else {
                tokio::fs::copy(&source, &dest).await?;
            }
            copied.push(log);
        }

        info!(count = copied.len(), "Archived logs copied");
        Ok(copied)
    }
}
