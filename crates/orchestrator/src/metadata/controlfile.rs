use regex::Regex;
use std::sync::OnceLock;

use super::grammar::{classify, strip_terminator, LineKind, Section};
use super::rewrite_pools;
use crate::error::{OrchestratorError, Result};
use clone_core::StorageNamespaceMap;

fn quoted_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"'([^']+)'").expect("valid quoted path regex"))
}

fn tempfile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^ALTER\s+TABLESPACE\s+(\S+)\s+ADD\s+TEMPFILE\s+'([^']+)'\s*(.*?)\s*;?\s*$")
            .expect("valid tempfile regex")
    })
}

fn size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bSIZE\s+(\S+)").expect("valid size regex"))
}

/// Header-only option lines folded into the canonical header.
const HEADER_OPTIONS: [&str; 5] = [
    "FORCE LOGGING",
    "ARCHIVELOG",
    "NOARCHIVELOG",
    "RESETLOGS",
    "NORESETLOGS",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLine {
    pub section: Section,
    pub text: String,
}

/// One `CREATE CONTROLFILE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateControlfile {
    pub header: String,
    pub lines: Vec<BlockLine>,
}

impl CreateControlfile {
    pub fn resetlogs(&self) -> bool {
        self.header
            .split_whitespace()
            .any(|token| token.eq_ignore_ascii_case("RESETLOGS"))
    }

    fn has_section(&self, section: Section) -> bool {
        self.lines.iter().any(|line| line.section == section)
    }

    /// Quoted file paths listed in one section, in script order.
    pub fn paths(&self, section: Section) -> Vec<String> {
        self.lines
            .iter()
            .filter(|line| line.section == section)
            .flat_map(|line| {
                quoted_path_pattern()
                    .captures_iter(&line.text)
                    .map(|c| c[1].to_string())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// `ALTER TABLESPACE ... ADD TEMPFILE` statement following a creation block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempfileStatement {
    pub tablespace: String,
    pub path: String,
    pub size: Option<String>,
    /// Remaining clauses (`AUTOEXTEND ...`) without `SIZE` and `REUSE`.
    pub options: String,
}

impl TempfileStatement {
    fn parse(line: &str) -> Option<Self> {
        let caps = tempfile_pattern().captures(line.trim())?;
        let rest = &caps[3];
        let size = size_pattern().captures(rest).map(|c| c[1].to_string());
        let without_size = size_pattern().replace(rest, "");
        let options = without_size
            .split_whitespace()
            .filter(|token| !token.eq_ignore_ascii_case("REUSE"))
            .collect::<Vec<_>>()
            .join(" ");

        Some(Self {
            tablespace: caps[1].to_string(),
            path: caps[2].to_string(),
            size,
            options,
        })
    }
}

/// Parsed reconstruction script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFileScript {
    pub block: CreateControlfile,
    pub tempfiles: Vec<TempfileStatement>,
}

#[derive(Default)]
struct ScriptParser {
    blocks: Vec<(CreateControlfile, Vec<TempfileStatement>)>,
    open: Option<CreateControlfile>,
    section: Option<Section>,
}

impl ScriptParser {
    fn close(&mut self) {
        if let Some(block) = self.open.take() {
            self.blocks.push((block, Vec::new()));
        }
    }

    fn push(&mut self, text: String) {
        let section = self.section.unwrap_or(Section::Limits);
        if let Some(block) = self.open.as_mut() {
            if !text.is_empty() {
                block.lines.push(BlockLine { section, text });
            }
        }
    }

    fn line(&mut self, raw: &str) {
        let kind = classify(raw);

        if self.open.is_some() {
            match kind {
                LineKind::Blank | LineKind::Comment => return,
                LineKind::Terminator => {
                    self.close();
                    return;
                }
                LineKind::Section(section, rest) => {
                    self.section = Some(section);
                    let (rest, closed) = strip_terminator(rest);
                    self.push(join_keyword(section.keyword(), rest));
                    if closed {
                        self.close();
                    }
                    return;
                }
                LineKind::Body(body) => {
                    let (body, closed) = strip_terminator(body);
                    self.push(body.to_string());
                    if closed {
                        self.close();
                    }
                    return;
                }
                LineKind::BlockOpen(_) | LineKind::Unrelated(_) => self.close(),
            }
        }

        match kind {
            LineKind::BlockOpen(header) => {
                let (header, closed) = strip_terminator(header);
                self.open = Some(CreateControlfile {
                    header: header.to_string(),
                    lines: Vec::new(),
                });
                self.section = Some(Section::Limits);
                if closed {
                    self.close();
                }
            }
            LineKind::Unrelated(statement) => {
                let Some(temp) = TempfileStatement::parse(statement) else {
                    return;
                };
                if let Some((_, tempfiles)) = self.blocks.last_mut() {
                    let duplicate = tempfiles
                        .iter()
                        .any(|t| t.tablespace == temp.tablespace && t.path == temp.path);
                    if !duplicate {
                        tempfiles.push(temp);
                    }
                }
            }
            _ => {}
        }
    }
}

impl ControlFileScript {
    /// Parse a trace script and select the reset-logs creation block.
    ///
    /// Traces may carry two blocks (one per logs option). The reset-logs block
    /// is preferred, otherwise the first one is used. Tempfile statements are
    /// taken from the statements following the selected block.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = ScriptParser::default();
        for raw in text.lines() {
            parser.line(raw);
        }
        parser.close();

        let mut blocks = parser.blocks;
        if blocks.is_empty() {
            return Err(OrchestratorError::ControlFile(
                "no CREATE CONTROLFILE statement found".to_string(),
            ));
        }
        let index = blocks
            .iter()
            .position(|(block, _)| block.resetlogs())
            .unwrap_or(0);
        let (block, tempfiles) = blocks.swap_remove(index);

        if !block.has_section(Section::LogFile) || !block.has_section(Section::DataFile) {
            return Err(OrchestratorError::ControlFile(
                "creation block lacks a LOGFILE or DATAFILE section".to_string(),
            ));
        }
        if block.paths(Section::DataFile).is_empty() {
            return Err(OrchestratorError::ControlFile(
                "creation block lists no datafiles".to_string(),
            ));
        }

        Ok(Self { block, tempfiles })
    }

    /// Every file path the script references.
    pub fn referenced_paths(&self) -> Vec<String> {
        let mut paths = self.block.paths(Section::LogFile);
        paths.extend(self.block.paths(Section::DataFile));
        paths.extend(self.tempfiles.iter().map(|t| t.path.clone()));
        paths
    }

    pub fn first_datafile(&self) -> Option<String> {
        self.block.paths(Section::DataFile).into_iter().next()
    }

    /// Render the creation statement for the target.
    pub fn render_create(&self, target_sid: &str, namespace: &StorageNamespaceMap) -> String {
        let mut out = format!(
            "CREATE CONTROLFILE SET DATABASE \"{}\" RESETLOGS NOARCHIVELOG\n",
            target_sid.to_ascii_uppercase()
        );
        for line in &self.block.lines {
            let upper = line.text.trim().to_ascii_uppercase();
            if HEADER_OPTIONS.contains(&upper.as_str()) {
                continue;
            }
            let indent = match line.section {
                Section::Limits => "    ",
                _ if is_keyword_line(&line.text, line.section) => "",
                _ => "  ",
            };
            out.push_str(indent);
            out.push_str(&rewrite_pools(&line.text, namespace));
            out.push('\n');
        }
        out.push_str(";\n");
        out
    }

    /// Render tempfile statements against the temp destination.
    pub fn render_tempfiles(&self, temp_dest: &str, size_override: Option<&str>) -> String {
        let mut out = String::new();
        for temp in &self.tempfiles {
            let dest = if temp_dest.starts_with('+') {
                temp_dest.to_string()
            } else {
                let file_name = temp.path.rsplit('/').next().unwrap_or(&temp.path);
                format!("{}/{}", temp_dest.trim_end_matches('/'), file_name)
            };
            out.push_str(&format!("ALTER TABLESPACE {} ADD TEMPFILE '{}'", temp.tablespace, dest));
            if let Some(size) = size_override.or(temp.size.as_deref()) {
                out.push_str(&format!(" SIZE {}", size));
            }
            if !temp.options.is_empty() {
                out.push(' ');
                out.push_str(&temp.options);
            }
            out.push_str(";\n");
        }
        out
    }
}

fn is_keyword_line(text: &str, section: Section) -> bool {
    matches!(classify(text), LineKind::Section(s, _) if s == section)
}

fn join_keyword(keyword: &str, rest: &str) -> String {
    if rest.is_empty() {
        keyword.to_string()
    } else {
        format!("{} {}", keyword, rest)
    }
}
