use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use bundle::{BundleError, CaptureArea, CaptureState};
use channels::{CommandRunner, SqlChannel, StorageTool};
use clone_core::{CloneConfig, ConsistencyWindow, StageResult, WindowMode};

use crate::archive_logs::ArchiveLogCopier;
use crate::error::{OrchestratorError, Result};
use crate::metadata::ControlFileScript;
use crate::resources::BackupModeGuard;
use crate::snapshot::SnapshotInvoker;
use crate::window::WindowController;

pub const INVENTORY_SQL: &str = "select name from v$datafile \
     union all select member from v$logfile \
     union all select name from v$tempfile;";

/// Path literal for a SQL statement.
pub(crate) fn sql_path(path: &Path) -> Result<String> {
    path.to_str()
        .filter(|p| !p.contains('\''))
        .map(str::to_string)
        .ok_or_else(|| OrchestratorError::Config(format!("unusable path {}", path.display())))
}

/// Release backup mode after `error`, folding a failed release into the error.
async fn compensate(guard: &mut Option<BackupModeGuard>, error: OrchestratorError) -> OrchestratorError {
    let Some(guard) = guard.as_mut().filter(|g| g.is_armed()) else {
        return error;
    };
    warn!(error = %error, "Releasing backup mode after failure");
    match guard.release().await {
        Ok(()) => error,
        Err(compensation) => {
            error!(error = %compensation, "Backup mode release failed");
            OrchestratorError::CompensationFailed {
                original: Box::new(error),
                compensation: compensation.to_string(),
            }
        }
    }
}

/// Source-side stages: prepare, snapshot, finalize, and their combination.
///
/// Progress is persisted in the capture area so the stages can run as
/// separate invocations.
pub struct SourceCapture {
    config: CloneConfig,
    source: Arc<dyn SqlChannel>,
    runner: Arc<dyn CommandRunner>,
    storage: Arc<dyn StorageTool>,
}

impl SourceCapture {
    pub fn new(
        config: CloneConfig,
        source: Arc<dyn SqlChannel>,
        runner: Arc<dyn CommandRunner>,
        storage: Arc<dyn StorageTool>,
    ) -> Self {
        Self {
            config,
            source,
            runner,
            storage,
        }
    }

    fn controller(&self) -> WindowController {
        WindowController::new(self.source.clone(), self.config.mode)
    }

    fn guard(&self, active: bool) -> Option<BackupModeGuard> {
        active.then(|| BackupModeGuard::arm(self.source.clone()))
    }

    fn load_state(area: &CaptureArea) -> Result<CaptureState> {
        area.read_state().map_err(|e| match e {
            BundleError::MissingFile(_) => OrchestratorError::StageState(format!(
                "no capture in {}; run prepare first",
                area.root().display()
            )),
            other => other.into(),
        })
    }

    fn open_window(state: &CaptureState) -> Result<ConsistencyWindow> {
        match &state.window {
            Some(window) if !window.is_closed() => Ok(window.clone()),
            Some(_) => Err(OrchestratorError::StageState(
                "consistency window is already closed".to_string(),
            )),
            None => Err(OrchestratorError::StageState(
                "no consistency window recorded".to_string(),
            )),
        }
    }

    /// Capture parameter text, control-file script and disk inventory.
    ///
    /// The script is parsed here so a malformed trace aborts before the
    /// window opens.
    pub async fn capture_metadata(&self, area: &CaptureArea) -> Result<usize> {
        let pfile = sql_path(&area.parameter_file())?;
        let output = self
            .source
            .execute(&format!("create pfile='{}' from spfile;", pfile))
            .await?;
        if let Some(diagnostic) = output.first_error() {
            debug!(diagnostic = %diagnostic, "No server parameter file, capturing from memory");
            self.source
                .execute_checked(&format!("create pfile='{}' from memory;", pfile))
                .await?;
        }

        match &self.config.controlfile_backup {
            Some(path) => {
                debug!(path = %path.display(), "Using existing control-file trace");
                tokio::fs::copy(path, area.controlfile_script()).await?;
            }
            None => {
                let trace = sql_path(&area.controlfile_script())?;
                self.source
                    .execute_checked(&format!(
                        "alter database backup controlfile to trace as '{}' reuse resetlogs;",
                        trace
                    ))
                    .await?;
            }
        }
        let script = tokio::fs::read_to_string(area.controlfile_script()).await?;
        ControlFileScript::parse(&script)?;

        let inventory: Vec<String> = self
            .source
            .execute_checked(INVENTORY_SQL)
            .await?
            .rows()
            .map(str::to_string)
            .collect();
        area.write_inventory(&inventory)?;

        info!(files = inventory.len(), "Source metadata captured");
        Ok(inventory.len())
    }

    pub async fn prepare(&self, area: &CaptureArea) -> Result<StageResult> {
        self.config.validate()?;
        if let Ok(existing) = area.read_state() {
            if existing.backup_active {
                return Err(OrchestratorError::StageState(
                    "a previous capture still holds backup mode; run finalize or release".into(),
                ));
            }
        }

        let files = self.capture_metadata(area).await?;
        let window = self.controller().begin().await?;
        let mut guard = self.guard(window.mode == WindowMode::Hot);

        let mut state = CaptureState::new(&self.config.source_sid);
        state.backup_active = guard.is_some();
        state.window = Some(window.clone());
        if let Err(e) = area.write_state(&state) {
            return Err(compensate(&mut guard, e.into()).await);
        }
        if let Some(guard) = guard.as_mut() {
            guard.disarm();
        }

        Ok(StageResult::success(format!(
            "{} window opened at sequence {}, change {}; {} files inventoried",
            window.mode.as_str(),
            window.begin_sequence,
            window.begin_change,
            files
        )))
    }

    pub async fn snapshot(&self, area: &CaptureArea) -> Result<StageResult> {
        self.config.validate_for_snapshot()?;
        let command = self.config.snapshot_command.clone().unwrap_or_default();
        let mut state = Self::load_state(area)?;
        let mut window = Self::open_window(&state)?;
        let mut guard = self.guard(state.backup_active);

        let taken = async {
            let at = SnapshotInvoker::new(self.runner.clone(), command)
                .invoke(&window)
                .await?;
            let change = self.controller().snapshot_change().await?;
            window.record_snapshot(at, change)?;
            Ok::<_, OrchestratorError>(at)
        }
        .await;

        let persisted = taken.and_then(|at| {
            state.window = Some(window);
            area.write_state(&state)?;
            Ok(at)
        });

        match persisted {
            Ok(at) => {
                if let Some(guard) = guard.as_mut() {
                    guard.disarm();
                }
                Ok(StageResult::success(format!(
                    "snapshot taken at {}",
                    at.to_rfc3339()
                )))
            }
            Err(e) => {
                let error = compensate(&mut guard, e).await;
                if state.backup_active && !guard.as_ref().is_some_and(BackupModeGuard::is_armed) {
                    state.backup_active = false;
                    if let Err(write) = area.write_state(&state) {
                        warn!(error = %write, "Could not record released backup mode");
                    }
                }
                Err(error)
            }
        }
    }

    pub async fn finalize(&self, area: &CaptureArea) -> Result<StageResult> {
        self.config.validate()?;
        let mut state = Self::load_state(area)?;
        let mut window = Self::open_window(&state)?;
        let mut guard = self.guard(state.backup_active);

        let result = match self.controller().end(&mut window).await {
            Ok(result) => result,
            Err(e) => return Err(compensate(&mut guard, e).await),
        };
        if let Some(guard) = guard.as_mut() {
            guard.disarm();
        }

        state.backup_active = false;
        state.window = Some(window.clone());
        area.write_state(&state)?;

        if window.mode == WindowMode::Hot {
            let copier = ArchiveLogCopier::new(self.source.clone(), self.storage.clone());
            state.archived_logs = copier.copy(&window, area).await?;
            area.write_state(&state)?;
        }

        if window.snapshot_at.is_none() && !result.is_advisory() {
            warn!("Window closed without a recorded snapshot");
            return Ok(StageResult::advisory(
                "no storage snapshot was recorded inside the window",
                result.output(),
            ));
        }
        Ok(result)
    }

    /// Prepare, snapshot and finalize as one unit.
    ///
    /// Each stage releases backup mode on its own failures. Interruption is
    /// handled by the caller, which drops this future and runs [`Self::release`].
    pub async fn capture(&self, area: &CaptureArea) -> Result<StageResult> {
        self.config.validate_for_snapshot()?;
        self.prepare(area).await?;
        self.snapshot(area).await?;
        self.finalize(area).await
    }

    /// Return the source to normal operation: end backup mode (hot) or
    /// start a stopped source (cold).
    pub async fn release(&self, area: &CaptureArea) -> Result<StageResult> {
        let controller = self.controller();
        let result = match self.config.mode {
            WindowMode::Hot => {
                if controller.release_if_active().await? {
                    StageResult::success("backup mode released")
                } else {
                    StageResult::success("no datafile in backup mode")
                }
            }
            WindowMode::Cold => match controller.restart_if_down().await? {
                Some(result) => result,
                None => StageResult::success("source already running"),
            },
        };

        if let Ok(mut state) = area.read_state() {
            if state.backup_active {
                state.backup_active = false;
                area.write_state(&state)?;
            }
        }
        Ok(result)
    }
}
