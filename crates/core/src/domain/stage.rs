use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CloneStage {
    #[default]
    Init,
    Prepare,
    Snapshot,
    Finalize,
    Transfer,
    Rename,
    Metadata,
    Recover,
    TempFix,
    Restart,
    Done,
    /// Tear down a previous clone on the target.
    Stop,
    Failed,
}

impl CloneStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Prepare => "prepare",
            Self::Snapshot => "snapshot",
            Self::Finalize => "finalize",
            Self::Transfer => "transfer",
            Self::Rename => "rename",
            Self::Metadata => "metadata",
            Self::Recover => "recover",
            Self::TempFix => "tempfix",
            Self::Restart => "restart",
            Self::Done => "done",
            Self::Stop => "stop",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for CloneStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a stage that did not fail fatally.
///
/// Fatal failures travel as `Err` values; an `Advisory` result means the stage
/// hit a problem the rest of the pipeline does not depend on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Success { output: String },
    Advisory { warning: String, output: String },
}

impl StageResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self::Success {
            output: output.into(),
        }
    }

    pub fn advisory(warning: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Advisory {
            warning: warning.into(),
            output: output.into(),
        }
    }

    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::Advisory { .. })
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            Self::Advisory { warning, .. } => Some(warning),
            Self::Success { .. } => None,
        }
    }

    pub fn output(&self) -> &str {
        match self {
            Self::Success { output } | Self::Advisory { output, .. } => output,
        }
    }
}
