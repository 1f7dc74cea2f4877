//! Line grammar for control-file reconstruction scripts.
//!
//! A script is a sequence of lines. The creation block opens at a line
//! starting with `CREATE CONTROLFILE`, contains section keywords (`LOGFILE`,
//! `DATAFILE`, `CHARACTER SET`) each followed by member lines, and closes at a
//! statement terminator or at a keyword that starts an unrelated statement.

/// Sections inside the creation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Limits (`MAXLOGFILES` ...) between the header and the first section.
    Limits,
    LogFile,
    DataFile,
    CharacterSet,
}

impl Section {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Limits => "",
            Self::LogFile => "LOGFILE",
            Self::DataFile => "DATAFILE",
            Self::CharacterSet => "CHARACTER SET",
        }
    }
}

/// Classification of a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    Blank,
    Comment,
    /// `CREATE CONTROLFILE ...` header.
    BlockOpen(&'a str),
    /// Section keyword with whatever follows it on the same line.
    Section(Section, &'a str),
    /// Lone `;`.
    Terminator,
    /// A statement that cannot be part of the creation block.
    Unrelated(&'a str),
    Body(&'a str),
}

const UNRELATED_KEYWORDS: [&str; 6] = ["RECOVER", "ALTER", "STARTUP", "SHUTDOWN", "SET ", "CREATE "];

fn starts_with_keyword(line: &str, keyword: &str) -> bool {
    let Some(head) = line.get(..keyword.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(keyword)
        && line[keyword.len()..]
            .chars()
            .next()
            .map(|c| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(true)
}

pub fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed.starts_with("--") || trimmed.starts_with("REM ") {
        return LineKind::Comment;
    }
    if trimmed == ";" {
        return LineKind::Terminator;
    }
    if starts_with_keyword(trimmed, "CREATE CONTROLFILE") {
        return LineKind::BlockOpen(trimmed);
    }
    for (keyword, section) in [
        ("LOGFILE", Section::LogFile),
        ("DATAFILE", Section::DataFile),
        ("CHARACTER SET", Section::CharacterSet),
    ] {
        if starts_with_keyword(trimmed, keyword) {
            return LineKind::Section(section, trimmed[keyword.len()..].trim());
        }
    }
    if UNRELATED_KEYWORDS
        .iter()
        .any(|kw| starts_with_keyword(trimmed, kw.trim_end()))
    {
        return LineKind::Unrelated(trimmed);
    }
    LineKind::Body(trimmed)
}

/// Split a trailing statement terminator off a line.
pub fn strip_terminator(line: &str) -> (&str, bool) {
    match line.trim_end().strip_suffix(';') {
        Some(rest) => (rest.trim_end(), true),
        None => (line.trim_end(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_block_lines() {
        assert_eq!(
            classify("CREATE CONTROLFILE REUSE DATABASE \"ORCL\" RESETLOGS  ARCHIVELOG"),
            LineKind::BlockOpen("CREATE CONTROLFILE REUSE DATABASE \"ORCL\" RESETLOGS  ARCHIVELOG")
        );
        assert_eq!(classify("LOGFILE"), LineKind::Section(Section::LogFile, ""));
        assert_eq!(classify("  DATAFILE"), LineKind::Section(Section::DataFile, ""));
        assert_eq!(
            classify("CHARACTER SET AL32UTF8"),
            LineKind::Section(Section::CharacterSet, "AL32UTF8")
        );
        assert_eq!(classify(";"), LineKind::Terminator);
        assert_eq!(classify("    MAXLOGFILES 16"), LineKind::Body("MAXLOGFILES 16"));
    }

    #[test]
    fn test_classify_outside_lines() {
        assert_eq!(classify("-- STANDBY LOGFILE"), LineKind::Comment);
        assert_eq!(classify("   "), LineKind::Blank);
        assert!(matches!(classify("RECOVER DATABASE USING BACKUP CONTROLFILE"), LineKind::Unrelated(_)));
        assert!(matches!(
            classify("ALTER TABLESPACE TEMP ADD TEMPFILE '+DATA' SIZE 10M;"),
            LineKind::Unrelated(_)
        ));
    }

    #[test]
    fn test_keyword_boundaries() {
        // A datafile path line must not be mistaken for the DATAFILE keyword.
        assert_eq!(
            classify("  '+DATA/ORCL/DATAFILE/system.257.1',"),
            LineKind::Body("'+DATA/ORCL/DATAFILE/system.257.1',")
        );
        assert_eq!(classify("LOGFILES_X"), LineKind::Body("LOGFILES_X"));
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("CHARACTER SET AL32UTF8;"), ("CHARACTER SET AL32UTF8", true));
        assert_eq!(strip_terminator("'+DATA/x',"), ("'+DATA/x',", false));
    }
}
