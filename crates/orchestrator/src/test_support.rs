//! Scripted collaborator fakes for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use channels::{CommandOutput, CommandRunner, SqlChannel, SqlOutput, StorageTool};

struct Rule {
    needle: String,
    responses: VecDeque<String>,
}

/// SQL channel answering by substring match; the last response of a rule repeats.
pub(crate) struct ScriptedSql {
    name: String,
    rules: Mutex<Vec<Rule>>,
    files: Vec<(String, String)>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedSql {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Mutex::new(Vec::new()),
            files: Vec::new(),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn on(self, needle: &str, response: &str) -> Self {
        self.on_sequence(needle, [response])
    }

    pub fn on_sequence<'a>(self, needle: &str, responses: impl IntoIterator<Item = &'a str>) -> Self {
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
        self.executed.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }
}

#[async_trait]
impl SqlChannel for ScriptedSql {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, script: &str) -> channels::Result<SqlOutput> {
        self.executed.lock().unwrap().push(script.to_string());

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

/// Command runner recording every invocation; answers per program name.
#[derive(Default)]
pub(crate) struct RecordingRunner {
    outputs: HashMap<String, CommandOutput>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, program: &str, output: CommandOutput) -> Self {
        self.outputs.insert(program.to_string(), output);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
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
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));
        Ok(self
            .outputs
            .get(program)
            .cloned()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

/// Storage tool over an in-memory disk-to-pool table.
#[derive(Default)]
pub(crate) struct FakeStorage {
    headers: HashMap<String, String>,
    failing_pool: Option<String>,
    renames: Mutex<Vec<(String, String, Vec<String>)>>,
    copies: Mutex<Vec<String>>,
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

    pub fn copies(&self) -> Vec<String> {
        self.copies.lock().unwrap().clone()
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
            return Err(channels::ChannelError::CommandFailed(format!(
                "renamedg exited with 1: {} has open files",
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
        self.copies.lock().unwrap().push(source.to_string());
        std::fs::write(dest, source.as_bytes())?;
        Ok(())
    }
}
