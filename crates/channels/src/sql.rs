use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{ChannelError, Result};

fn diagnostic_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(ORA|SP2|RMAN)-(\d{4,5}):?\s*(.*)$").expect("Invalid diagnostic regex")
    })
}

/// A diagnostic code reported by the database tooling, e.g. `ORA-00279`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbDiagnostic {
    pub facility: String,
    pub number: u32,
    pub message: String,
}

impl DbDiagnostic {
    pub fn code(&self) -> String {
        let width = if self.facility == "SP2" { 4 } else { 5 };
        format!("{}-{:0width$}", self.facility, self.number, width = width)
    }

    pub fn is(&self, facility: &str, number: u32) -> bool {
        self.facility == facility && self.number == number
    }

    /// Parse a single output line, if it carries a diagnostic.
    pub fn parse_line(line: &str) -> Option<Self> {
        let caps = diagnostic_pattern().captures(line)?;
        Some(Self {
            facility: caps.get(1)?.as_str().to_string(),
            number: caps.get(2)?.as_str().parse().ok()?,
            message: caps
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        })
    }
}

impl fmt::Display for DbDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

/// Line-oriented result of one channel round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlOutput {
    pub lines: Vec<String>,
    pub diagnostics: Vec<DbDiagnostic>,
}

impl SqlOutput {
    pub fn parse(raw: &str) -> Self {
        let lines: Vec<String> = raw
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect();
        let diagnostics = lines
            .iter()
            .filter_map(|line| DbDiagnostic::parse_line(line))
            .collect();
        Self { lines, diagnostics }
    }

    pub fn first_error(&self) -> Option<&DbDiagnostic> {
        self.diagnostics.first()
    }

    pub fn contains_code(&self, facility: &str, number: u32) -> bool {
        self.diagnostics.iter().any(|d| d.is(facility, number))
    }

    /// Non-blank lines that are not diagnostics.
    pub fn rows(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && DbDiagnostic::parse_line(line).is_none())
    }

    pub fn first_row(&self) -> Option<&str> {
        self.rows().next()
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Administrative session that accepts script text and returns its output.
#[async_trait]
pub trait SqlChannel: Send + Sync {
    /// Identifier used in logs (instance name).
    fn name(&self) -> &str;

    /// Run a script; diagnostics are returned, not raised.
    async fn execute(&self, script: &str) -> Result<SqlOutput>;

    /// Run a script and fail on the first diagnostic.
    async fn execute_checked(&self, script: &str) -> Result<SqlOutput> {
        let output = self.execute(script).await?;
        match output.first_error() {
            Some(diagnostic) => Err(ChannelError::Database {
                code: diagnostic.code(),
                message: diagnostic.message.clone(),
            }),
            None => Ok(output),
        }
    }

    /// Single-value query; the first result row.
    async fn query_value(&self, sql: &str) -> Result<String> {
        let output = self.execute_checked(sql).await?;
        output
            .first_row()
            .map(str::to_string)
            .ok_or_else(|| ChannelError::Parse(format!("no rows returned for: {}", sql.trim())))
    }

    async fn query_number(&self, sql: &str) -> Result<u64> {
        let value = self.query_value(sql).await?;
        value
            .trim()
            .parse()
            .map_err(|_| ChannelError::Parse(format!("expected a number, got '{}'", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_diagnostic_line() {
        let d = DbDiagnostic::parse_line(
            "ORA-00279: change 5100 generated at 10/18/2026 10:00:00 needed for thread 1",
        )
        .unwrap();
        assert_eq!(d.facility, "ORA");
        assert_eq!(d.number, 279);
        assert_eq!(d.code(), "ORA-00279");
        assert!(d.message.starts_with("change 5100"));
    }

    #[test]
    fn test_parse_sp2_diagnostic() {
        let d = DbDiagnostic::parse_line("SP2-0640: Not connected").unwrap();
        assert_eq!(d.code(), "SP2-0640");
        assert!(d.is("SP2", 640));
    }

    #[test]
    fn test_output_rows_skip_diagnostics() {
        let output = SqlOutput::parse("\n  104\nORA-01034: ORACLE not available\n\n");
        assert_eq!(output.first_row(), Some("104"));
        assert!(output.contains_code("ORA", 1034));
        assert_eq!(output.rows().count(), 1);
    }

    #[test]
    fn test_clean_output() {
        let output = SqlOutput::parse("OPEN\n");
        assert!(output.first_error().is_none());
        assert_eq!(output.first_row(), Some("OPEN"));
    }
}
