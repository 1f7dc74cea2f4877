use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Source stays open in backup mode while the snapshot is taken.
    #[default]
    Hot,
    /// Source is shut down cleanly for the snapshot.
    Cold,
}

impl WindowMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Cold => "cold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hot" => Some(Self::Hot),
            "cold" => Some(Self::Cold),
            _ => None,
        }
    }
}

/// Redo boundaries of the interval the storage snapshot must fall into.
///
/// A window is opened once, may record the snapshot instant while open, and is
/// closed once. Closing checks that the end markers never precede the begin
/// markers; after that the window is read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsistencyWindow {
    pub mode: WindowMode,
    pub begin_sequence: u64,
    pub begin_change: u64,
    pub opened_at: DateTime<Utc>,
    pub snapshot_at: Option<DateTime<Utc>>,
    pub snapshot_change: Option<u64>,
    pub end_sequence: Option<u64>,
    pub end_change: Option<u64>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl ConsistencyWindow {
    pub fn open(mode: WindowMode, begin_sequence: u64, begin_change: u64) -> Self {
        Self {
            mode,
            begin_sequence,
            begin_change,
            opened_at: Utc::now(),
            snapshot_at: None,
            snapshot_change: None,
            end_sequence: None,
            end_change: None,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Record the storage snapshot. Only legal while the window is open.
    pub fn record_snapshot(&mut self, at: DateTime<Utc>, change: Option<u64>) -> Result<()> {
        if self.is_closed() {
            return Err(CoreError::WindowViolation(
                "snapshot recorded after the window was closed".to_string(),
            ));
        }
        if at < self.opened_at {
            return Err(CoreError::WindowViolation(
                "snapshot taken before the window was opened".to_string(),
            ));
        }
        if let Some(change) = change {
            if change < self.begin_change {
                return Err(CoreError::WindowViolation(format!(
                    "snapshot change {} precedes window begin {}",
                    change, self.begin_change
                )));
            }
        }
        self.snapshot_at = Some(at);
        self.snapshot_change = change;
        Ok(())
    }

    pub fn close(&mut self, end_sequence: u64, end_change: u64) -> Result<()> {
        if self.is_closed() {
            return Err(CoreError::WindowViolation(
                "window already closed".to_string(),
            ));
        }
        if end_change < self.begin_change {
            return Err(CoreError::WindowViolation(format!(
                "end change {} precedes begin change {}",
                end_change, self.begin_change
            )));
        }
        if end_sequence < self.begin_sequence {
            return Err(CoreError::WindowViolation(format!(
                "end sequence {} precedes begin sequence {}",
                end_sequence, self.begin_sequence
            )));
        }
        if let Some(snapshot_change) = self.snapshot_change {
            if end_change < snapshot_change {
                return Err(CoreError::WindowViolation(format!(
                    "end change {} precedes snapshot change {}",
                    end_change, snapshot_change
                )));
            }
        }
        self.end_sequence = Some(end_sequence);
        self.end_change = Some(end_change);
        self.closed_at = Some(Utc::now());
        Ok(())
    }

    /// Change marker recovery must stop at.
    pub fn recovery_target(&self) -> Option<u64> {
        self.end_change
    }

    /// Redo sequences whose archived copies belong to the window.
    pub fn sequence_range(&self) -> Option<RangeInclusive<u64>> {
        self.end_sequence
            .map(|end| self.begin_sequence..=end)
    }

    pub fn contains_sequence(&self, sequence: u64) -> bool {
        self.sequence_range()
            .map(|range| range.contains(&sequence))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_window_lifecycle() {
        let mut window = ConsistencyWindow::open(WindowMode::Hot, 100, 5000);
        window
            .record_snapshot(Utc::now() + Duration::milliseconds(1), Some(5010))
            .unwrap();
        window.close(104, 5100).unwrap();

        assert!(window.is_closed());
        assert_eq!(window.recovery_target(), Some(5100));
        assert_eq!(window.sequence_range(), Some(100..=104));
        assert!(window.contains_sequence(100));
        assert!(window.contains_sequence(104));
        assert!(!window.contains_sequence(99));
        assert!(!window.contains_sequence(105));
    }

    #[test]
    fn test_window_rejects_backwards_end() {
        let mut window = ConsistencyWindow::open(WindowMode::Hot, 100, 5000);
        assert!(window.close(104, 4999).is_err());
        assert!(window.close(99, 5000).is_err());
        assert!(!window.is_closed());
    }

    #[test]
    fn test_snapshot_after_close_rejected() {
        let mut window = ConsistencyWindow::open(WindowMode::Cold, 7, 900);
        window.close(7, 900).unwrap();
        assert!(window.record_snapshot(Utc::now(), None).is_err());
    }

    #[test]
    fn test_open_window_has_no_range() {
        let window = ConsistencyWindow::open(WindowMode::Hot, 100, 5000);
        assert_eq!(window.sequence_range(), None);
        assert_eq!(window.recovery_target(), None);
        assert!(!window.contains_sequence(100));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(WindowMode::parse("hot"), Some(WindowMode::Hot));
        assert_eq!(WindowMode::parse("cold"), Some(WindowMode::Cold));
        assert_eq!(WindowMode::parse("warm"), None);
    }
}
