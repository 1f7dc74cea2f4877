use std::sync::Arc;
use tracing::{debug, info, warn};

use channels::{SqlChannel, SqlOutput};
use clone_core::{ConsistencyWindow, DbStatus, StageResult, WindowMode};

use crate::error::{OrchestratorError, Result};

pub const INSTANCE_STATUS_SQL: &str = "select status from v$instance;";
pub const CURRENT_SEQUENCE_SQL: &str = "select max(sequence#) from v$log;";
pub const ARCHIVED_SEQUENCE_SQL: &str = "select max(sequence#) from v$archived_log;";
pub const CURRENT_CHANGE_SQL: &str = "select current_scn from v$database;";
pub const ACTIVE_BACKUP_SQL: &str = "select count(*) from v$backup where status = 'ACTIVE';";

const CHECKPOINT: &str = "alter system checkpoint;";
const SWITCH_LOG: &str = "alter system archive log current;";
const BEGIN_BACKUP: &str = "alter database begin backup;";
const END_BACKUP: &str = "alter database end backup;";

/// Current instance status.
///
/// An instance that is not started reports `ORACLE not available`, which maps
/// to `Down`. Any status outside the recognized set is an error.
pub async fn instance_status(channel: &dyn SqlChannel) -> Result<DbStatus> {
    let output = channel.execute(INSTANCE_STATUS_SQL).await?;
    if output.contains_code("ORA", 1034) || output.contains_code("ORA", 27101) {
        return Ok(DbStatus::Down);
    }
    if let Some(diagnostic) = output.first_error() {
        return Err(channels::ChannelError::Database {
            code: diagnostic.code(),
            message: diagnostic.message.clone(),
        }
        .into());
    }

    let status = DbStatus::parse(output.first_row().unwrap_or_default());
    debug!(instance = %channel.name(), status = %status, "Instance status");
    match status {
        DbStatus::Unrecognized(raw) => Err(OrchestratorError::UnrecognizedStatus(raw)),
        status => Ok(status),
    }
}

/// Take the database out of backup mode.
///
/// `ORA-01142` (no file in backup) counts as released, so the call is safe
/// to repeat as a compensating action.
pub async fn end_backup(channel: &dyn SqlChannel) -> Result<()> {
    let output = channel
        .execute(END_BACKUP)
        .await
        .map_err(|e| OrchestratorError::BackupRelease(e.to_string()))?;
    match output.first_error() {
        None => {
            info!(instance = %channel.name(), "Backup mode released");
            Ok(())
        }
        Some(diagnostic) if diagnostic.is("ORA", 1142) => {
            debug!(instance = %channel.name(), "No datafile in backup mode");
            Ok(())
        }
        Some(diagnostic) => Err(OrchestratorError::BackupRelease(diagnostic.to_string())),
    }
}

/// Begins and ends the source's consistency window.
pub struct WindowController {
    channel: Arc<dyn SqlChannel>,
    mode: WindowMode,
}

impl WindowController {
    pub fn new(channel: Arc<dyn SqlChannel>, mode: WindowMode) -> Self {
        Self { channel, mode }
    }

    pub fn mode(&self) -> WindowMode {
        self.mode
    }

    async fn run(&self, sql: &str) -> Result<SqlOutput> {
        debug!(instance = %self.channel.name(), sql = %sql, "Window statement");
        Ok(self.channel.execute_checked(sql).await?)
    }

    async fn number(&self, sql: &str) -> Result<u64> {
        Ok(self.channel.query_number(sql).await?)
    }

    /// Open the window. Any failure here is fatal and leaves no window open.
    pub async fn begin(&self) -> Result<ConsistencyWindow> {
        let begin_failed = |e: OrchestratorError| OrchestratorError::WindowBegin(e.to_string());

        let status = instance_status(self.channel.as_ref()).await.map_err(begin_failed)?;
        match self.mode {
            WindowMode::Hot => {
                if status != DbStatus::Open {
                    return Err(OrchestratorError::WindowBegin(format!(
                        "source must be open for a hot window, found {}",
                        status
                    )));
                }
                self.run(CHECKPOINT).await.map_err(begin_failed)?;
                let sequence = self.number(CURRENT_SEQUENCE_SQL).await.map_err(begin_failed)?;
                self.run(SWITCH_LOG).await.map_err(begin_failed)?;
                let change = self.number(CURRENT_CHANGE_SQL).await.map_err(begin_failed)?;
                self.run(BEGIN_BACKUP).await.map_err(begin_failed)?;

                info!(sequence, change, "Hot window opened");
                Ok(ConsistencyWindow::open(WindowMode::Hot, sequence, change))
            }
            WindowMode::Cold => {
                if !status.is_running() {
                    return Err(OrchestratorError::WindowBegin(
                        "source must be running to record the window markers".to_string(),
                    ));
                }
                self.run(CHECKPOINT).await.map_err(begin_failed)?;
                let sequence = self.number(CURRENT_SEQUENCE_SQL).await.map_err(begin_failed)?;
                let change = self.number(CURRENT_CHANGE_SQL).await.map_err(begin_failed)?;
                self.run("shutdown immediate").await.map_err(begin_failed)?;

                let status = instance_status(self.channel.as_ref()).await.map_err(begin_failed)?;
                if status != DbStatus::Down {
                    return Err(OrchestratorError::WindowBegin(format!(
                        "source still {} after shutdown",
                        status
                    )));
                }
                info!(sequence, change, "Cold window opened");
                Ok(ConsistencyWindow::open(WindowMode::Cold, sequence, change))
            }
        }
    }

    /// Change marker at snapshot time; unavailable while a cold source is down.
    pub async fn snapshot_change(&self) -> Result<Option<u64>> {
        match self.mode {
            WindowMode::Hot => Ok(Some(self.number(CURRENT_CHANGE_SQL).await?)),
            WindowMode::Cold => Ok(None),
        }
    }

    /// Close the window.
    ///
    /// Hot: release backup mode (fatal on failure), switch logs, record the
    /// marker, switch again so the marker's redo is archived, then record the
    /// last archived sequence. Cold: restart the source; a failed restart is
    /// advisory.
    pub async fn end(&self, window: &mut ConsistencyWindow) -> Result<StageResult> {
        match self.mode {
            WindowMode::Hot => {
                end_backup(self.channel.as_ref()).await?;
                self.run(SWITCH_LOG).await?;
                let change = self.number(CURRENT_CHANGE_SQL).await?;
                self.run(SWITCH_LOG).await?;
                let sequence = self.number(ARCHIVED_SEQUENCE_SQL).await?;
                window.close(sequence, change)?;

                info!(sequence, change, "Hot window closed");
                Ok(StageResult::success(format!(
                    "window closed at sequence {}, change {}",
                    sequence, change
                )))
            }
            WindowMode::Cold => {
                window.close(window.begin_sequence, window.begin_change)?;
                info!("Cold window closed, restarting source");
                Ok(self.restart_source().await)
            }
        }
    }

    async fn restart_source(&self) -> StageResult {
        let outcome = match self.channel.execute("startup").await {
            Ok(output) => match output.first_error() {
                Some(diagnostic) => Err(diagnostic.to_string()),
                None => match instance_status(self.channel.as_ref()).await {
                    Ok(DbStatus::Open) => Ok(output.text()),
                    Ok(status) => Err(format!("source is {} after startup", status)),
                    Err(e) => Err(e.to_string()),
                },
            },
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(text) => StageResult::success(text),
            Err(reason) => {
                warn!(reason = %reason, "Source did not restart after cold window");
                StageResult::advisory("source did not restart after the cold window", reason)
            }
        }
    }

    /// Release backup mode if any datafile is still in active backup.
    pub async fn release_if_active(&self) -> Result<bool> {
        let active = self
            .number(ACTIVE_BACKUP_SQL)
            .await
            .map_err(|e| OrchestratorError::BackupRelease(e.to_string()))?;
        if active == 0 {
            return Ok(false);
        }
        warn!(files = active, "Datafiles still in backup mode, releasing");
        end_backup(self.channel.as_ref()).await?;
        Ok(true)
    }

    /// Start a cold source that is down. Returns whether a startup was issued.
    pub async fn restart_if_down(&self) -> Result<Option<StageResult>> {
        match instance_status(self.channel.as_ref()).await? {
            DbStatus::Down => Ok(Some(self.restart_source().await)),
            _ => Ok(None),
        }
    }
}
