use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

use channels::{SqlChannel, SqlOutput};
use clone_core::{DbStatus, MetadataBundle, StageResult, WindowMode};

use crate::capture::sql_path;
use crate::error::{OrchestratorError, Result};
use crate::window::instance_status;

/// Diagnostics that only prompt for the next archived log.
///
/// ORA-00279 change needed, ORA-00280 change in sequence, ORA-00289
/// suggestion, ORA-00278 log no longer needed, ORA-00308 and ORA-27037 the
/// suggested file could not be opened.
pub const BENIGN_RECOVERY_CODES: [u32; 6] = [279, 280, 289, 278, 308, 27037];

const NEXT_LOG_NEEDED: u32 = 279;
const SEQUENCE_PROMPT: u32 = 280;

fn sequence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)sequence\s*#\s*(\d+)").expect("valid sequence regex"))
}

/// Redo sequence named by the ORA-00280 prompt, if the output carries one.
pub fn requested_sequence(output: &SqlOutput) -> Option<u64> {
    output
        .diagnostics
        .iter()
        .filter(|d| d.is("ORA", SEQUENCE_PROMPT))
        .find_map(|d| sequence_pattern().captures(&d.message))
        .and_then(|caps| caps[1].parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryProgress {
    NeedsLog,
    Complete,
}

/// Classify one recovery round-trip. Any diagnostic outside the benign set is fatal.
pub fn classify_recovery(output: &SqlOutput) -> Result<RecoveryProgress> {
    let mut needs_log = false;
    for diagnostic in output.diagnostics.iter() {
        if diagnostic.facility != "ORA" || !BENIGN_RECOVERY_CODES.contains(&diagnostic.number) {
            return Err(OrchestratorError::Recovery {
                code: diagnostic.code(),
                message: diagnostic.message.clone(),
            });
        }
        needs_log |= diagnostic.number == NEXT_LOG_NEEDED;
    }
    Ok(if needs_log {
        RecoveryProgress::NeedsLog
    } else {
        RecoveryProgress::Complete
    })
}

fn sql_literal(path: &Path) -> Result<String> {
    sql_path(path).map(|p| format!("'{}'", p))
}

/// Drives the target instance from down to open.
pub struct RecoveryController {
    target: Arc<dyn SqlChannel>,
    target_sid: String,
}

impl RecoveryController {
    pub fn new(target: Arc<dyn SqlChannel>, target_sid: impl Into<String>) -> Self {
        Self {
            target,
            target_sid: target_sid.into(),
        }
    }

    async fn expect_status(&self, expected: DbStatus, step: &str) -> Result<()> {
        let status = instance_status(self.target.as_ref()).await?;
        if status == expected {
            Ok(())
        } else {
            Err(OrchestratorError::Verification(format!(
                "target is {} after {}, expected {}",
                status, step, expected
            )))
        }
    }

    /// Start the instance without mounting, from the transformed parameter file.
    pub async fn start_nomount(&self, pfile: &Path) -> Result<()> {
        let status = instance_status(self.target.as_ref()).await?;
        if status != DbStatus::Down {
            return Err(OrchestratorError::StageState(format!(
                "target instance {} is already {}; run stop first",
                self.target_sid, status
            )));
        }

        info!(sid = %self.target_sid, "Starting target in nomount");
        self.target
            .execute_checked(&format!("startup nomount pfile={}", sql_literal(pfile)?))
            .await?;
        self.expect_status(DbStatus::StartedNomount, "startup nomount").await
    }

    /// Execute the transformed control-file script; the instance ends up mounted.
    pub async fn create_controlfile(&self, script: &str) -> Result<()> {
        info!(sid = %self.target_sid, "Creating control file");
        self.target
            .execute_checked(script)
            .await
            .map_err(|e| OrchestratorError::ControlFile(e.to_string()))?;
        self.expect_status(DbStatus::Mounted, "control file creation").await
    }

    /// Apply the bundle's archived redo and stop at the captured marker.
    pub async fn recover(&self, bundle: &MetadataBundle, archive_dir: &Path) -> Result<StageResult> {
        let window = bundle.window();
        match window.mode {
            WindowMode::Hot => self.recover_until_change(bundle, archive_dir).await,
            WindowMode::Cold => self.recover_consistent().await,
        }
    }

    async fn recover_until_change(
        &self,
        bundle: &MetadataBundle,
        archive_dir: &Path,
    ) -> Result<StageResult> {
        let marker = bundle.recovery_target();
        info!(change = marker, logs = bundle.archived_logs().len(), "Starting media recovery");

        let mut output = self
            .target
            .execute(&format!(
                "alter database recover database until change {} using backup controlfile;",
                marker
            ))
            .await?;
        let mut progress = classify_recovery(&output)?;
        let logs = bundle.archived_logs();
        let mut next = 0usize;
        let mut applied = 0usize;

        while progress == RecoveryProgress::NeedsLog {
            let position = match requested_sequence(&output) {
                Some(sequence) => match logs.iter().position(|l| l.sequence == sequence) {
                    Some(pos) if pos >= next => pos,
                    Some(_) => {
                        return Err(OrchestratorError::Recovery {
                            code: "ORA-00280".to_string(),
                            message: format!(
                                "sequence {} requested again after it was applied",
                                sequence
                            ),
                        });
                    }
                    None => return Err(Self::missing_log(marker, applied, Some(sequence))),
                },
                None if next < logs.len() => next,
                None => return Err(Self::missing_log(marker, applied, None)),
            };

            let log = &logs[position];
            if position > next {
                debug!(from = logs[next].sequence, to = log.sequence, "Skipping logs already covered");
            }
            let path = archive_dir.join(&log.file_name);
            debug!(sequence = log.sequence, path = %path.display(), "Applying archived log");
            output = self
                .target
                .execute(&format!("alter database recover logfile {};", sql_literal(&path)?))
                .await?;
            progress = classify_recovery(&output)?;
            next = position + 1;
            applied += 1;
        }

        info!(change = marker, applied, "Media recovery complete");
        Ok(StageResult::success(format!(
            "recovered until change {} with {} archived logs",
            marker, applied
        )))
    }

    fn missing_log(marker: u64, applied: usize, sequence: Option<u64>) -> OrchestratorError {
        error!(change = marker, applied, sequence, "Archived redo exhausted before the marker");
        let requested = sequence
            .map(|s| format!("; sequence {} is not in the capture", s))
            .unwrap_or_default();
        OrchestratorError::Recovery {
            code: "ORA-00279".to_string(),
            message: format!(
                "archived redo exhausted after {} logs before change {}{}",
                applied, marker, requested
            ),
        }
    }

    /// A cleanly shut down source needs no redo: start and cancel recovery.
    async fn recover_consistent(&self) -> Result<StageResult> {
        info!("Source was closed cleanly, cancelling recovery before any redo");
        let output = self
            .target
            .execute("alter database recover database until cancel using backup controlfile;")
            .await?;
        if classify_recovery(&output)? == RecoveryProgress::NeedsLog {
            let output = self.target.execute("alter database recover cancel;").await?;
            classify_recovery(&output)?;
        }
        Ok(StageResult::success("recovery cancelled at the consistent shutdown point"))
    }

    /// Open with reset-logs, write the durable parameter object, verify identity.
    ///
    /// The instance runs from a text parameter file, so the control-file
    /// locations go into that file before the durable object is created from it.
    pub async fn open_resetlogs(&self, pfile: &Path) -> Result<StageResult> {
        info!(sid = %self.target_sid, "Opening with resetlogs");
        self.target
            .execute_checked("alter database open resetlogs;")
            .await
            .map_err(|e| OrchestratorError::OpenResetLogs(e.to_string()))?;

        let controlfiles: Vec<String> = self
            .target
            .execute_checked("select name from v$controlfile;")
            .await?
            .rows()
            .map(|name| format!("'{}'", name))
            .collect();
        if controlfiles.is_empty() {
            warn!("No control file reported, durable parameters keep the default location");
        } else {
            let mut parameters = tokio::fs::read_to_string(pfile).await?;
            if !parameters.is_empty() && !parameters.ends_with('\n') {
                parameters.push('\n');
            }
            parameters.push_str(&format!("*.control_files={}\n", controlfiles.join(",")));
            tokio::fs::write(pfile, parameters).await?;
            debug!(pfile = %pfile.display(), "Control-file locations recorded");
        }

        self.target
            .execute_checked(&format!("create spfile from pfile={};", sql_literal(pfile)?))
            .await?;

        self.verify().await?;
        Ok(StageResult::success(format!(
            "{} open, control files: {}",
            self.target_sid,
            controlfiles.join(",")
        )))
    }

    /// The target must be open under its own name.
    pub async fn verify(&self) -> Result<()> {
        self.expect_status(DbStatus::Open, "open").await?;
        let name = self
            .target
            .query_value("select name from v$database;")
            .await?;
        if !name.trim().eq_ignore_ascii_case(&self.target_sid) {
            return Err(OrchestratorError::Verification(format!(
                "database reports name {}, expected {}",
                name.trim(),
                self.target_sid
            )));
        }
        debug!(name = %name.trim(), "Target identity verified");
        Ok(())
    }

    /// Recreate tempfiles, which media recovery does not restore.
    pub async fn fix_tempfiles(&self, script: &str) -> Result<StageResult> {
        let statements = script.lines().filter(|l| !l.trim().is_empty()).count();
        if statements == 0 {
            return Ok(StageResult::success("no tempfiles to add"));
        }
        info!(statements, "Adding tempfiles");
        self.target.execute_checked(script).await?;
        Ok(StageResult::success(format!("{} tempfiles added", statements)))
    }

    /// Restart once from the durable parameter object, or leave the clone down.
    pub async fn restart(&self, start_after_create: bool) -> Result<StageResult> {
        info!(sid = %self.target_sid, "Shutting down clone");
        self.target.execute_checked("shutdown immediate").await?;
        self.expect_status(DbStatus::Down, "shutdown").await?;

        if !start_after_create {
            return Ok(StageResult::success("clone shut down and left down"));
        }

        info!(sid = %self.target_sid, "Starting clone from its durable parameters");
        self.target.execute_checked("startup").await?;
        self.verify().await?;
        Ok(StageResult::success(format!("{} restarted and open", self.target_sid)))
    }

    /// Abort a running target instance. Returns whether one was running.
    pub async fn abort(&self) -> Result<bool> {
        match instance_status(self.target.as_ref()).await? {
            DbStatus::Down => Ok(false),
            status => {
                warn!(sid = %self.target_sid, status = %status, "Aborting target instance");
                self.target.execute_checked("shutdown abort").await?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSql;
    use crate::window::INSTANCE_STATUS_SQL;
    use clone_core::{ArchivedLog, ConsistencyWindow};
    use tempfile::TempDir;

    fn needs_log(sequence: u64) -> String {
        format!(
            "ORA-00279: change 5001 generated at 10/18/2026 10:00:00 needed for thread 1\n\
             ORA-00289: suggestion : +FRA/ORCL/ARCHIVELOG/thread_1_seq_{0}.302.1\n\
             ORA-00280: change 5001 for thread 1 is in sequence #{0}",
            sequence
        )
    }

    fn bundle(mode: WindowMode, logs: &[u64]) -> MetadataBundle {
        let mut window = ConsistencyWindow::open(mode, 100, 5000);
        window.close(103, 5100).unwrap();
        MetadataBundle::new(
            "ORCL",
            "",
            "",
            vec![],
            logs.iter()
                .map(|s| ArchivedLog {
                    sequence: *s,
                    file_name: format!("arch_{}.arc", s),
                })
                .collect(),
            window,
        )
        .unwrap()
    }

    #[test]
    fn test_classify_recovery() {
        assert_eq!(
            classify_recovery(&SqlOutput::parse(&needs_log(101))).unwrap(),
            RecoveryProgress::NeedsLog
        );
        assert_eq!(
            classify_recovery(&SqlOutput::parse("Database altered.")).unwrap(),
            RecoveryProgress::Complete
        );
        let err = classify_recovery(&SqlOutput::parse(
            "ORA-00279: change 5001 needed\nORA-01547: warning: RECOVER succeeded but OPEN RESETLOGS would get error below",
        ))
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::Recovery { code, .. } if code == "ORA-01547"));
    }

    #[test]
    fn test_requested_sequence() {
        assert_eq!(requested_sequence(&SqlOutput::parse(&needs_log(101))), Some(101));
        assert_eq!(requested_sequence(&SqlOutput::parse("Database altered.")), None);
    }

    #[tokio::test]
    async fn test_recovery_stops_at_marker() {
        let (first, second) = (needs_log(101), needs_log(102));
        let target = Arc::new(
            ScriptedSql::new("COPY")
                .on("until change", &first)
                .on_sequence("recover logfile", [second.as_str(), "Database altered."]),
        );
        let controller = RecoveryController::new(target.clone(), "COPY");

        let result = controller
            .recover(&bundle(WindowMode::Hot, &[100, 101, 102, 103]), Path::new("/scratch/arch"))
            .await
            .unwrap();

        assert!(!result.is_advisory());
        let executed = target.executed();
        assert!(executed[0].contains("until change 5100 using backup controlfile"));
        assert_eq!(target.count("recover logfile"), 2);
        assert!(executed[1].contains("'/scratch/arch/arch_101.arc'"));
        assert!(executed[2].contains("'/scratch/arch/arch_102.arc'"));
        assert_eq!(target.count("arch_100"), 0);
    }

    #[tokio::test]
    async fn test_recovery_applies_requested_sequence() {
        let first = needs_log(101);
        let target = Arc::new(
            ScriptedSql::new("COPY")
                .on("until change", &first)
                .on_sequence("recover logfile", [first.as_str(), "Database altered."]),
        );
        let controller = RecoveryController::new(target.clone(), "COPY");

        let err = controller
            .recover(&bundle(WindowMode::Hot, &[100, 101, 102, 103]), Path::new("/scratch/arch"))
            .await
            .unwrap_err();

        assert!(target.executed()[1].contains("arch_101.arc"));
        assert!(err.to_string().contains("requested again"));
    }

    #[tokio::test]
    async fn test_recovery_unexpected_code_is_fatal() {
        let first = needs_log(100);
        let target = Arc::new(
            ScriptedSql::new("COPY")
                .on("until change", &first)
                .on("recover logfile", "ORA-00328: archived log ends at change 4000, need later change 5001"),
        );
        let controller = RecoveryController::new(target, "COPY");

        let err = controller
            .recover(&bundle(WindowMode::Hot, &[100]), Path::new("/scratch/arch"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, OrchestratorError::Recovery { code, .. } if code == "ORA-00328"));
    }

    #[tokio::test]
    async fn test_recovery_runs_out_of_logs() {
        let (first, second) = (needs_log(101), needs_log(102));
        let target = Arc::new(
            ScriptedSql::new("COPY")
                .on("until change", &first)
                .on("recover logfile", &second),
        );
        let controller = RecoveryController::new(target.clone(), "COPY");

        let err = controller
            .recover(&bundle(WindowMode::Hot, &[100, 101]), Path::new("/scratch/arch"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exhausted"));
        assert!(err.to_string().contains("sequence 102 is not in the capture"));
        assert_eq!(target.count("recover logfile"), 1);
    }

    #[tokio::test]
    async fn test_cold_recovery_applies_no_redo() {
        let prompt = needs_log(100);
        let target = Arc::new(ScriptedSql::new("COPY").on("until cancel", &prompt));
        let controller = RecoveryController::new(target.clone(), "COPY");

        controller
            .recover(&bundle(WindowMode::Cold, &[]), Path::new("/scratch/arch"))
            .await
            .unwrap();
        assert_eq!(target.count("recover logfile"), 0);
        assert_eq!(target.count("recover cancel"), 1);
    }

    #[tokio::test]
    async fn test_open_and_verify() {
        let dir = TempDir::new().unwrap();
        let pfile = dir.path().join("initCOPY.ora");
        std::fs::write(&pfile, "*.db_name='COPY'\n").unwrap();
        let target = Arc::new(
            ScriptedSql::new("COPY")
                .on(INSTANCE_STATUS_SQL, "OPEN")
                .on("v$controlfile", "+COPY_DATA/COPY/CONTROLFILE/current.256.1")
                .on("v$database", "COPY"),
        );
        let controller = RecoveryController::new(target.clone(), "COPY");

        controller.open_resetlogs(&pfile).await.unwrap();

        let parameters = std::fs::read_to_string(&pfile).unwrap();
        assert!(parameters.ends_with(
            "*.control_files='+COPY_DATA/COPY/CONTROLFILE/current.256.1'\n"
        ));
        assert_eq!(target.count("create spfile from pfile="), 1);
        assert_eq!(target.count("scope=spfile"), 0);
        let executed = target.executed();
        let query = executed.iter().position(|s| s.contains("v$controlfile")).unwrap();
        let spfile = executed.iter().position(|s| s.contains("create spfile")).unwrap();
        assert!(query < spfile);
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_name() {
        let target = Arc::new(
            ScriptedSql::new("COPY")
                .on(INSTANCE_STATUS_SQL, "OPEN")
                .on("v$database", "ORCL"),
        );
        let err = RecoveryController::new(target, "COPY").verify().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Verification(_)));
    }

    #[tokio::test]
    async fn test_open_resetlogs_failure() {
        let target = Arc::new(ScriptedSql::new("COPY").on(
            "open resetlogs",
            "ORA-01152: file 1 was not restored from a sufficiently old backup",
        ));
        let err = RecoveryController::new(target, "COPY")
            .open_resetlogs(Path::new("/scratch/initCOPY.ora"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::OpenResetLogs(_)));
    }

    #[tokio::test]
    async fn test_start_nomount_requires_down() {
        let target = Arc::new(ScriptedSql::new("COPY").on(INSTANCE_STATUS_SQL, "OPEN"));
        let err = RecoveryController::new(target.clone(), "COPY")
            .start_nomount(Path::new("/scratch/initCOPY.ora"))
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(target.count("startup"), 0);
    }

    #[tokio::test]
    async fn test_restart_left_down() {
        let target = Arc::new(ScriptedSql::new("COPY").on(
            INSTANCE_STATUS_SQL,
            "ORA-01034: ORACLE not available",
        ));
        let result = RecoveryController::new(target.clone(), "COPY")
            .restart(false)
            .await
            .unwrap();
        assert_eq!(result.output(), "clone shut down and left down");
        assert_eq!(target.count("startup"), 0);
    }
}
