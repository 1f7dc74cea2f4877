use clone_core::CloneStage;
use thiserror::Error;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The pipeline cannot safely continue.
    Fatal,
    /// The current stage stops, but the failure is not a pipeline abort
    /// (bad configuration, missing stage state, invalid stage order).
    Reported,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition { from: CloneStage, to: CloneStage },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stage state unavailable: {0}")]
    StageState(String),

    #[error("Could not open consistency window: {0}")]
    WindowBegin(String),

    #[error("Could not release backup mode: {0}")]
    BackupRelease(String),

    #[error("Storage snapshot failed: {0}")]
    Snapshot(String),

    #[error("Archived redo copy failed: {0}")]
    ArchiveLogs(String),

    #[error("Control-file script rejected: {0}")]
    ControlFile(String),

    #[error("Storage pool {pool} rename failed: {reason}")]
    Rename { pool: String, reason: String },

    #[error("Storage pool {pool} mount failed: {reason}")]
    Mount { pool: String, reason: String },

    #[error("Media recovery failed with {code}: {message}")]
    Recovery { code: String, message: String },

    #[error("Open with reset-logs failed: {0}")]
    OpenResetLogs(String),

    #[error("Unrecognized database status '{0}'")]
    UnrecognizedStatus(String),

    #[error("Clone verification failed: {0}")]
    Verification(String),

    #[error("Remote stage failed on {host}: {reason}")]
    Bridge { host: String, reason: String },

    #[error("Remote stage on {host} exceeded {seconds}s")]
    RemoteTimeout { host: String, seconds: u64 },

    #[error("Run interrupted")]
    Interrupted,

    #[error("{original}; compensation also failed: {compensation}")]
    CompensationFailed {
        original: Box<OrchestratorError>,
        compensation: String,
    },

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: CloneStage,
        #[source]
        source: Box<OrchestratorError>,
    },

    #[error("Core error: {0}")]
    Core(#[from] clone_core::CoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] channels::ChannelError),

    #[error("Bundle error: {0}")]
    Bundle(#[from] bundle::BundleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn rename_failed(pool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rename {
            pool: pool.into(),
            reason: reason.into(),
        }
    }

    pub fn mount_failed(pool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mount {
            pool: pool.into(),
            reason: reason.into(),
        }
    }

    pub fn in_stage(self, stage: CloneStage) -> Self {
        match self {
            already @ Self::Stage { .. } => already,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::InvalidTransition { .. } | Self::Config(_) | Self::StageState(_) => {
                Severity::Reported
            }
            Self::Core(clone_core::CoreError::InvalidConfig(_)) => Severity::Reported,
            Self::Stage { source, .. } => source.severity(),
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Stage the failure was attributed to, if any.
    pub fn stage(&self) -> Option<CloneStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(OrchestratorError::Snapshot("exit 1".into()).is_fatal());
        assert!(!OrchestratorError::Config("missing".into()).is_fatal());
        assert_eq!(
            OrchestratorError::StageState("no capture.json".into()).severity(),
            Severity::Reported
        );
    }

    #[test]
    fn test_in_stage_keeps_innermost() {
        let err = OrchestratorError::rename_failed("DATA", "renamedg exited with 1")
            .in_stage(CloneStage::Rename)
            .in_stage(CloneStage::Done);
        assert_eq!(err.stage(), Some(CloneStage::Rename));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("DATA"));
    }

    #[test]
    fn test_stage_wrapping_preserves_reported_severity() {
        let err = OrchestratorError::Config("bad".into()).in_stage(CloneStage::Prepare);
        assert_eq!(err.severity(), Severity::Reported);
    }
}
