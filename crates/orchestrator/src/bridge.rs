use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use bundle::{BundleManifest, BundleReader, BundleWriter, BUNDLE_EXTENSION};
use channels::{CommandOutput, RemoteShell};
use clone_core::{CloneConfig, StageResult};

use crate::error::{OrchestratorError, Result};

const RELEASE_CEILING: Duration = Duration::from_secs(60);
/// Time the remote stage gets to release the source after its interrupt, before it is killed.
const REMOTE_GRACE: Duration = Duration::from_secs(30);
/// Exit statuses of `timeout` when the deadline fired (interrupt, then kill).
const DEADLINE_EXITS: [i32; 2] = [124, 137];

/// Wrap a remote command so it cannot outlive `ceiling` on the remote host.
///
/// The command is interrupted at the deadline, which releases the source,
/// and killed if it is still running after the grace period.
pub fn deadline_command(ceiling: Duration, args: &[String]) -> Vec<String> {
    let mut command = vec![
        "timeout".to_string(),
        "--signal=INT".to_string(),
        format!("--kill-after={}s", REMOTE_GRACE.as_secs()),
        format!("{}s", ceiling.as_secs()),
    ];
    command.extend(args.iter().cloned());
    command
}

/// Local wait for a deadline-wrapped command: long enough for the remote side to end first.
fn local_wait(ceiling: Duration) -> Duration {
    ceiling + REMOTE_GRACE * 2
}

fn hit_deadline(output: &CommandOutput) -> bool {
    output
        .exit_code
        .map(|code| DEADLINE_EXITS.contains(&code))
        .unwrap_or(false)
}

/// Flags that reproduce the source-side configuration on the remote host.
///
/// The source host itself is never forwarded: remotely the source is local.
pub fn forwarded_flags(config: &CloneConfig) -> Vec<String> {
    let mut flags = vec![
        "--source-sid".to_string(),
        config.source_sid.clone(),
        "--target-sid".to_string(),
        config.target_sid.clone(),
        "--mode".to_string(),
        config.mode.as_str().to_string(),
    ];
    if let Some(command) = &config.snapshot_command {
        flags.extend(["--snapshot-command".to_string(), command.clone()]);
    }
    let paths = [
        ("--source-home", &config.source_home),
        ("--grid-home", &config.grid_home),
        ("--controlfile-backup", &config.controlfile_backup),
    ];
    for (flag, path) in paths {
        if let Some(path) = path {
            flags.extend([flag.to_string(), path.display().to_string()]);
        }
    }
    flags.extend(["--asm-sid".to_string(), config.asm_sid.clone()]);
    if config.debug {
        flags.push("--debug".to_string());
    }
    flags
}

/// Pack a capture directory on a blocking thread.
pub async fn pack(source_dir: PathBuf, archive: PathBuf) -> Result<BundleManifest> {
    let manifest = tokio::task::spawn_blocking(move || {
        BundleWriter::default().pack(&source_dir, &archive)
    })
    .await
    .map_err(|e| OrchestratorError::Io(std::io::Error::other(e)))??;
    Ok(manifest)
}

/// Unpack and verify an archive on a blocking thread.
pub async fn unpack(archive: PathBuf, dest: PathBuf) -> Result<BundleManifest> {
    let manifest = tokio::task::spawn_blocking(move || BundleReader::unpack(&archive, &dest))
        .await
        .map_err(|e| OrchestratorError::Io(std::io::Error::other(e)))??;
    Ok(manifest)
}

/// Runs the source-side capture on the source host and brings the archive back.
pub struct TransferBridge {
    remote: Arc<dyn RemoteShell>,
    config: CloneConfig,
    binary: PathBuf,
}

impl TransferBridge {
    /// `binary` is the local executable shipped to the remote host.
    pub fn new(remote: Arc<dyn RemoteShell>, config: CloneConfig, binary: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            config,
            binary: binary.into(),
        }
    }

    fn remote_path(&self, name: &str) -> String {
        self.config.remote_dir.join(name).display().to_string()
    }

    fn bridge_error(&self, reason: impl ToString) -> OrchestratorError {
        OrchestratorError::Bridge {
            host: self.remote.host().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Push, execute under the time ceiling, pull. Returns the local archive path.
    pub async fn fetch(&self, tag: &str, dest_dir: &Path) -> Result<PathBuf> {
        let host = self.remote.host().to_string();
        let binary = self.remote_path(&format!("snapclone-{}", tag));
        let archive = self.remote_path(&format!("snapclone-{}.{}", tag, BUNDLE_EXTENSION));

        info!(host = %host, binary = %binary, "Pushing executable to source host");
        self.remote
            .push(&self.binary, &binary)
            .await
            .map_err(|e| self.bridge_error(e))?;

        let mut args = vec![
            binary.clone(),
            "capture".to_string(),
            "--archive".to_string(),
            archive.clone(),
        ];
        args.extend(forwarded_flags(&self.config));

        let ceiling = self.config.remote_timeout();
        let command = deadline_command(ceiling, &args);
        let timed_out = || OrchestratorError::RemoteTimeout {
            host: host.clone(),
            seconds: ceiling.as_secs(),
        };
        info!(host = %host, seconds = ceiling.as_secs(), "Running remote capture");
        let failure = match tokio::time::timeout(local_wait(ceiling), self.remote.exec(&command)).await {
            Err(_) => Some(timed_out()),
            Ok(Err(e)) => Some(self.bridge_error(e)),
            Ok(Ok(output)) if hit_deadline(&output) => Some(timed_out()),
            Ok(Ok(output)) if !output.success() => Some(self.bridge_error(format!(
                "remote capture exited with {}: {}",
                output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                output.stderr.trim()
            ))),
            Ok(Ok(output)) => {
                debug!(stdout = %output.stdout.trim(), "Remote capture finished");
                None
            }
        };

        if let Some(failure) = failure {
            error!(host = %host, error = %failure, "Remote capture failed");
            let failure = self.release_remote(&binary, failure).await;
            self.cleanup(&[binary, archive]).await;
            return Err(failure);
        }

        let local = dest_dir.join(format!("capture.{}", BUNDLE_EXTENSION));
        info!(host = %host, archive = %archive, "Pulling capture archive");
        let pulled = self.remote.pull(&archive, &local).await;
        self.cleanup(&[binary, archive]).await;
        pulled.map_err(|e| self.bridge_error(e))?;
        Ok(local)
    }

    /// Run the remote `release` stage, bounded in time.
    async fn exec_release(&self, binary: &str) -> std::result::Result<(), String> {
        let mut args = vec![binary.to_string(), "release".to_string()];
        args.extend(forwarded_flags(&self.config));

        let ceiling = RELEASE_CEILING.min(self.config.remote_timeout());
        let command = deadline_command(ceiling, &args);
        match tokio::time::timeout(local_wait(ceiling), self.remote.exec(&command)).await {
            Ok(Ok(output)) if output.success() => {
                info!(host = %self.remote.host(), "Source released");
                Ok(())
            }
            Ok(Ok(output)) => Err(format!("remote release exited: {}", output.stderr.trim())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("remote release exceeded {}s", ceiling.as_secs())),
        }
    }

    /// Best-effort release after a remote failure; a failed release is folded into the error.
    async fn release_remote(&self, binary: &str, original: OrchestratorError) -> OrchestratorError {
        match self.exec_release(binary).await {
            Ok(()) => original,
            Err(compensation) => {
                error!(host = %self.remote.host(), error = %compensation, "Remote release failed");
                OrchestratorError::CompensationFailed {
                    original: Box::new(original),
                    compensation,
                }
            }
        }
    }

    /// Ship the executable and release the source, e.g. after an interrupted run.
    pub async fn release(&self, tag: &str) -> Result<StageResult> {
        let binary = self.remote_path(&format!("snapclone-{}", tag));
        self.remote
            .push(&self.binary, &binary)
            .await
            .map_err(|e| self.bridge_error(e))?;
        let released = self.exec_release(&binary).await;
        self.cleanup(&[binary]).await;
        released.map_err(|reason| self.bridge_error(reason))?;
        Ok(StageResult::success(format!(
            "source released on {}",
            self.remote.host()
        )))
    }

    async fn cleanup(&self, paths: &[String]) {
        let mut args = vec!["rm".to_string(), "-f".to_string()];
        args.extend(paths.iter().cloned());
        match tokio::time::timeout(RELEASE_CEILING, self.remote.exec(&args)).await {
            Ok(Ok(output)) if output.success() => {}
            _ => warn!(host = %self.remote.host(), "Could not remove remote files"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clone_core::WindowMode;
    use std::sync::Mutex;

    struct FakeRemote {
        capture: CommandOutput,
        hang: bool,
        execs: Mutex<Vec<Vec<String>>>,
    }

    impl FakeRemote {
        fn new(capture: CommandOutput, hang: bool) -> Self {
            Self {
                capture,
                hang,
                execs: Mutex::new(Vec::new()),
            }
        }

        fn subcommands(&self) -> Vec<String> {
            self.execs
                .lock()
                .unwrap()
                .iter()
                .map(|args| subcommand(args))
                .collect()
        }
    }

    /// Argument after the executable, looking through a deadline wrapper.
    fn subcommand(args: &[String]) -> String {
        let args = match args.first().map(String::as_str) {
            Some("timeout") => &args[4..],
            _ => args,
        };
        args.get(1).cloned().unwrap_or_default()
    }

    #[async_trait]
    impl RemoteShell for FakeRemote {
        fn host(&self) -> &str {
            "src01"
        }

        async fn push(&self, _local: &Path, _remote_path: &str) -> channels::Result<()> {
            Ok(())
        }

        async fn exec(&self, args: &[String]) -> channels::Result<CommandOutput> {
            self.execs.lock().unwrap().push(args.to_vec());
            if subcommand(args) == "capture" {
                if self.hang {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                return Ok(self.capture.clone());
            }
            Ok(CommandOutput::ok(""))
        }

        async fn pull(&self, _remote_path: &str, local: &Path) -> channels::Result<()> {
            std::fs::write(local, b"archive")?;
            Ok(())
        }
    }

    fn config() -> CloneConfig {
        let mut config = CloneConfig::new("ORCL", "COPY");
        config.source_host = Some("src01".to_string());
        config.snapshot_command = Some("/opt/snap/create".to_string());
        config
    }

    #[test]
    fn test_forwarded_flags() {
        let mut config = config();
        config.mode = WindowMode::Cold;
        let flags = forwarded_flags(&config);

        assert!(flags.windows(2).any(|w| w == ["--mode", "cold"]));
        assert!(flags.windows(2).any(|w| w == ["--snapshot-command", "/opt/snap/create"]));
        assert!(!flags.iter().any(|f| f == "src01"));
        assert!(!flags.iter().any(|f| f == "--debug"));
    }

    #[tokio::test]
    async fn test_fetch_pulls_archive() {
        let dir = tempfile::TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new(CommandOutput::ok("done"), false));
        let bridge = TransferBridge::new(remote.clone(), config(), "/usr/local/bin/snapclone");

        let local = bridge.fetch("abcd1234", dir.path()).await.unwrap();

        assert!(local.exists());
        assert_eq!(remote.subcommands(), vec!["capture", "-f"]);
        let execs = remote.execs.lock().unwrap();
        assert_eq!(
            execs[0][..7],
            [
                "timeout",
                "--signal=INT",
                "--kill-after=30s",
                "300s",
                "/tmp/snapclone-abcd1234",
                "capture",
                "--archive",
            ]
        );
        assert_eq!(execs[0][7], "/tmp/snapclone-abcd1234.tar.zst");
        assert_eq!(execs[1][..2], ["rm", "-f"]);
    }

    #[tokio::test]
    async fn test_remote_failure_releases_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new(CommandOutput::failed(2, "ORA-01123"), false));
        let bridge = TransferBridge::new(remote.clone(), config(), "/usr/local/bin/snapclone");

        let err = bridge.fetch("abcd1234", dir.path()).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Bridge { .. }));
        assert!(err.to_string().contains("ORA-01123"));
        assert_eq!(remote.subcommands(), vec!["capture", "release", "-f"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new(CommandOutput::ok(""), true));
        let bridge = TransferBridge::new(remote.clone(), config(), "/usr/local/bin/snapclone");

        let err = bridge.fetch("abcd1234", dir.path()).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::RemoteTimeout { seconds: 300, .. }));
        assert!(err.is_fatal());
        assert!(remote.subcommands().contains(&"release".to_string()));
    }

    #[tokio::test]
    async fn test_release_runs_remote_stage() {
        let remote = Arc::new(FakeRemote::new(CommandOutput::ok(""), false));
        let bridge = TransferBridge::new(remote.clone(), config(), "/usr/local/bin/snapclone");

        let result = bridge.release("abcd1234").await.unwrap();

        assert_eq!(result.output(), "source released on src01");
        assert_eq!(remote.subcommands(), vec!["release", "-f"]);
    }

    #[tokio::test]
    async fn test_remote_deadline_exit_is_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new(CommandOutput::failed(124, ""), false));
        let bridge = TransferBridge::new(remote.clone(), config(), "/usr/local/bin/snapclone");

        let err = bridge.fetch("abcd1234", dir.path()).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::RemoteTimeout { seconds: 300, .. }));
        let execs = remote.execs.lock().unwrap();
        let release = execs.iter().find(|args| subcommand(args) == "release").unwrap();
        assert_eq!(release[..4], ["timeout", "--signal=INT", "--kill-after=30s", "60s"]);
    }

    #[test]
    fn test_local_wait_outlasts_remote_deadline() {
        let ceiling = Duration::from_secs(300);
        assert!(local_wait(ceiling) > ceiling + REMOTE_GRACE);
    }
}
