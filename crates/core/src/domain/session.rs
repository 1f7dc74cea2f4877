use serde::{Deserialize, Serialize};
use std::fmt;

/// Instance state as reported by the database.
///
/// Raw status text is mapped through [`DbStatus::parse`]. Anything that is not
/// one of the recognized states lands in `Unrecognized` and must be treated as
/// a fatal classification failure by callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DbStatus {
    #[default]
    Down,
    StartedNomount,
    Mounted,
    Open,
    Unrecognized(String),
}

impl DbStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Down => "down",
            Self::StartedNomount => "started",
            Self::Mounted => "mounted",
            Self::Open => "open",
            Self::Unrecognized(raw) => raw.as_str(),
        }
    }

    /// Map the instance status column (`v$instance.status`) to a state.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DOWN" | "SHUTDOWN" => Self::Down,
            "STARTED" => Self::StartedNomount,
            "MOUNTED" => Self::Mounted,
            "OPEN" => Self::Open,
            _ => Self::Unrecognized(raw.trim().to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::StartedNomount | Self::Mounted | Self::Open)
    }
}

impl fmt::Display for DbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_recognized() {
        assert_eq!(DbStatus::parse("OPEN"), DbStatus::Open);
        assert_eq!(DbStatus::parse(" mounted \n"), DbStatus::Mounted);
        assert_eq!(DbStatus::parse("STARTED"), DbStatus::StartedNomount);
        assert_eq!(DbStatus::parse("DOWN"), DbStatus::Down);
    }

    #[test]
    fn test_status_parse_unrecognized() {
        let status = DbStatus::parse("OPEN MIGRATE");
        assert_eq!(status, DbStatus::Unrecognized("OPEN MIGRATE".to_string()));
        assert!(!status.is_running());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&DbStatus::StartedNomount).unwrap();
        assert_eq!(json, "\"started_nomount\"");
    }
}
