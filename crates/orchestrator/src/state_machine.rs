use clone_core::{CloneStage, StageResult};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};

pub struct CloneStateMachine;

impl CloneStateMachine {
    pub fn validate_transition(from: &CloneStage, to: &CloneStage) -> Result<()> {
        if *to == CloneStage::Failed && !from.is_terminal() {
            return Ok(());
        }

        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: *from,
                to: *to,
            })
        }
    }

    fn allowed_transitions(from: &CloneStage) -> Vec<CloneStage> {
        match from {
            CloneStage::Init => vec![
                CloneStage::Stop,
                CloneStage::Prepare,
                CloneStage::Finalize,
                CloneStage::Transfer,
                CloneStage::Rename,
            ],
            CloneStage::Stop => vec![CloneStage::Prepare, CloneStage::Transfer, CloneStage::Done],
            CloneStage::Prepare => vec![CloneStage::Snapshot, CloneStage::Done],
            CloneStage::Snapshot => vec![CloneStage::Finalize, CloneStage::Done],
            CloneStage::Finalize => vec![CloneStage::Transfer, CloneStage::Done],
            CloneStage::Transfer => vec![CloneStage::Rename],
            CloneStage::Rename => vec![CloneStage::Metadata],
            CloneStage::Metadata => vec![CloneStage::Recover],
            CloneStage::Recover => vec![CloneStage::TempFix],
            CloneStage::TempFix => vec![CloneStage::Restart],
            CloneStage::Restart => vec![CloneStage::Done],
            CloneStage::Done | CloneStage::Failed => vec![],
        }
    }
}

/// Record of one completed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: CloneStage,
    pub result: StageResult,
}

/// Current position of a run plus the results collected so far.
#[derive(Debug, Default)]
pub struct RunProgress {
    current: CloneStage,
    history: Vec<StageRecord>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> CloneStage {
        self.current
    }

    pub fn enter(&mut self, stage: CloneStage) -> Result<()> {
        CloneStateMachine::validate_transition(&self.current, &stage)?;
        info!(from = %self.current, to = %stage, "Stage transition");
        self.current = stage;
        Ok(())
    }

    /// Record the result of the current stage.
    pub fn complete(&mut self, result: StageResult) {
        if let Some(warning) = result.warning() {
            warn!(stage = %self.current, warning = %warning, "Stage finished with advisory");
        }
        self.history.push(StageRecord {
            stage: self.current,
            result,
        });
    }

    /// Move to `Failed` and attribute the error to the stage that was running.
    pub fn fail(&mut self, error: OrchestratorError) -> OrchestratorError {
        let stage = self.current;
        if !stage.is_terminal() {
            self.current = CloneStage::Failed;
        }
        error.in_stage(stage)
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    pub fn warnings(&self) -> Vec<String> {
        self.history
            .iter()
            .filter_map(|r| r.result.warning().map(|w| format!("{}: {}", r.stage, w)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(from: CloneStage, to: CloneStage) -> bool {
        CloneStateMachine::validate_transition(&from, &to).is_ok()
    }

    #[test]
    fn test_valid_transitions() {
        assert!(allowed(CloneStage::Init, CloneStage::Stop));
        assert!(allowed(CloneStage::Prepare, CloneStage::Snapshot));
        assert!(allowed(CloneStage::Transfer, CloneStage::Rename));
        assert!(allowed(CloneStage::Recover, CloneStage::Failed));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!allowed(CloneStage::Init, CloneStage::Recover));
        assert!(!allowed(CloneStage::Prepare, CloneStage::Finalize));
        assert!(!allowed(CloneStage::Transfer, CloneStage::Recover));
        assert!(!allowed(CloneStage::Done, CloneStage::Failed));
    }

    #[test]
    fn test_end_to_end_pipeline_is_allowed() {
        let pipeline = [
            CloneStage::Init,
            CloneStage::Stop,
            CloneStage::Transfer,
            CloneStage::Rename,
            CloneStage::Metadata,
            CloneStage::Recover,
            CloneStage::TempFix,
            CloneStage::Restart,
            CloneStage::Done,
        ];
        for pair in pipeline.windows(2) {
            assert!(allowed(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_progress_records_warnings() {
        let mut progress = RunProgress::new();
        progress.enter(CloneStage::Prepare).unwrap();
        progress.complete(StageResult::success("ok"));
        progress.enter(CloneStage::Snapshot).unwrap();
        progress.complete(StageResult::advisory("slow", ""));

        assert_eq!(progress.history().len(), 2);
        assert_eq!(progress.warnings(), vec!["snapshot: slow".to_string()]);
    }

    #[test]
    fn test_progress_fail_attributes_stage() {
        let mut progress = RunProgress::new();
        progress.enter(CloneStage::Stop).unwrap();
        progress.enter(CloneStage::Transfer).unwrap();
        let err = progress.fail(OrchestratorError::Interrupted);

        assert_eq!(progress.current(), CloneStage::Failed);
        assert_eq!(err.stage(), Some(CloneStage::Transfer));
        assert!(progress.enter(CloneStage::Rename).is_err());
    }
}
