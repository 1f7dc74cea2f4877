//! Scripted collaborators shared by the pipeline tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use channels::{
    ChannelError, CommandOutput, CommandRunner, RemoteShell, SqlChannel, SqlOutput, StorageTool,
};

pub const DOWN: &str = "ORA-01034: ORACLE not available";

/// Recovery prompt asking for the archived log of `sequence`.
pub fn needs_log(sequence: u64) -> String {
    format!(
        "ORA-00279: change 5001 generated at 10/18/2026 10:00:00 needed for thread 1\n\
         ORA-00289: suggestion : +FRA/ORCL/ARCHIVELOG/thread_1_seq_{0}.302.1\n\
         ORA-00280: change 5001 for thread 1 is in sequence #{0}",
        sequence
    )
}

/// Ordered record of every call across collaborators.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first entry containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.contains(needle))
    }
}

struct Rule {
    needle: String,
    responses: VecDeque<String>,
}

/// SQL channel answering by substring; first matching rule wins, its last response repeats.
pub struct ScriptedSql {
    name: String,
    rules: Mutex<Vec<Rule>>,
    files: Vec<(String, String)>,
    journal: Journal,
}

impl ScriptedSql {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Mutex::new(Vec::new()),
            files: Vec::new(),
            journal: Journal::default(),
        }
    }

    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    pub fn on(self, needle: &str, response: &str) -> Self {
        self.on_sequence(needle, [response])
    }

    pub fn on_sequence<'a>(
        self,
        needle: &str,
        responses: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            responses: responses.into_iter().map(str::to_string).collect(),
        });
        self
    }

    /// Write `contents` to the first quoted path of any script containing `needle`.
    pub fn writes_file(mut self, needle: &str, contents: &str) -> Self {
        self.files.push((needle.to_string(), contents.to_string()));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        let prefix = format!("{}: ", self.name);
        self.journal
            .entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.executed().iter().filter(|s| s.contains(needle)).count()
    }
}

#[async_trait]
impl SqlChannel for ScriptedSql {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, script: &str) -> channels::Result<SqlOutput> {
        self.journal.push(format!("{}: {}", self.name, script));

        for (needle, contents) in &self.files {
            if script.contains(needle.as_str()) {
                if let Some(path) = script.split('\'').nth(1) {
                    std::fs::write(path, contents)?;
                }
            }
        }

        let mut rules = self.rules.lock().unwrap();
        let response = rules
            .iter_mut()
            .find(|rule| script.contains(rule.needle.as_str()))
            .map(|rule| {
                if rule.responses.len() > 1 {
                    rule.responses.pop_front().unwrap_or_default()
                } else {
                    rule.responses.front().cloned().unwrap_or_default()
                }
            })
            .unwrap_or_default();
        Ok(SqlOutput::parse(&response))
    }
}

/// Command runner answering per program name, successful by default.
#[derive(Default)]
pub struct RecordingRunner {
    outputs: HashMap<String, CommandOutput>,
    journal: Journal,
}

impl RecordingRunner {
    pub fn new(journal: &Journal) -> Self {
        Self {
            outputs: HashMap::new(),
            journal: journal.clone(),
        }
    }

    pub fn respond(mut self, program: &str, output: CommandOutput) -> Self {
        self.outputs.insert(program.to_string(), output);
        self
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _env: &[(String, String)],
    ) -> channels::Result<CommandOutput> {
        self.journal
            .push(format!("run: {} {}", program, args.join(" ")).trim().to_string());
        Ok(self
            .outputs
            .get(program)
            .cloned()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

/// Storage tool over an in-memory disk header table.
#[derive(Default)]
pub struct FakeStorage {
    headers: HashMap<String, String>,
    failing_pool: Option<String>,
    renames: Mutex<Vec<(String, String, Vec<String>)>>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disk(mut self, path: &str, pool: &str) -> Self {
        self.headers.insert(path.to_string(), pool.to_string());
        self
    }

    pub fn fail_rename_of(mut self, pool: &str) -> Self {
        self.failing_pool = Some(pool.to_string());
        self
    }

    pub fn renames(&self) -> Vec<(String, String, Vec<String>)> {
        self.renames.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageTool for FakeStorage {
    async fn pool_of_disk(&self, disk: &str) -> channels::Result<Option<String>> {
        Ok(self.headers.get(disk).cloned())
    }

    async fn rename_pool(
        &self,
        from: &str,
        to: &str,
        disks: &[String],
        _config_file: &Path,
    ) -> channels::Result<CommandOutput> {
        if self.failing_pool.as_deref() == Some(from) {
            return Err(ChannelError::CommandFailed(format!(
                "renamedg exited with 1: {} is busy",
                from
            )));
        }
        self.renames
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string(), disks.to_vec()));
        Ok(CommandOutput::ok(""))
    }

    async fn copy_out(&self, source: &str, dest: &Path) -> channels::Result<()> {
        std::fs::write(dest, source.as_bytes())?;
        Ok(())
    }
}

/// Remote shell whose capture either hangs or returns a fixed result.
pub struct FakeRemote {
    capture: CommandOutput,
    hang: bool,
    journal: Journal,
}

impl FakeRemote {
    pub fn hanging(journal: &Journal) -> Self {
        Self {
            capture: CommandOutput::ok(""),
            hang: true,
            journal: journal.clone(),
        }
    }

    pub fn failing(journal: &Journal, output: CommandOutput) -> Self {
        Self {
            capture: output,
            hang: false,
            journal: journal.clone(),
        }
    }
}

#[async_trait]
impl RemoteShell for FakeRemote {
    fn host(&self) -> &str {
        "src01"
    }

    async fn push(&self, _local: &Path, remote_path: &str) -> channels::Result<()> {
        self.journal.push(format!("push: {}", remote_path));
        Ok(())
    }

    async fn exec(&self, args: &[String]) -> channels::Result<CommandOutput> {
        // Look through the `timeout ... <ceiling>` wrapper to the executable.
        let command = match args.first().map(String::as_str) {
            Some("timeout") => &args[4..],
            _ => args,
        };
        let subcommand = command.get(1).cloned().unwrap_or_default();
        self.journal.push(format!("exec: {}", subcommand));
        if subcommand == "capture" {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            }
            return Ok(self.capture.clone());
        }
        Ok(CommandOutput::ok(""))
    }

    async fn pull(&self, remote_path: &str, _local: &Path) -> channels::Result<()> {
        self.journal.push(format!("pull: {}", remote_path));
        Err(ChannelError::CommandFailed("nothing to pull".to_string()))
    }
}
