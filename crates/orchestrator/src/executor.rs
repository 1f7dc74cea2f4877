use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use bundle::{BundleError, CaptureArea};
use channels::{
    CommandRunner, GridTools, Privilege, ProcessRunner, RemoteShell, SqlChannel, SqlPlus,
    SshRemote, StorageTool,
};
use clone_core::{CloneConfig, CloneContext, CloneStage, MetadataBundle, StageResult};

use crate::bridge::{self, TransferBridge};
use crate::capture::SourceCapture;
use crate::error::{OrchestratorError, Result};
use crate::metadata::MetadataTransformer;
use crate::recovery::RecoveryController;
use crate::rename::StorageRenamer;
use crate::resources::ScratchArea;
use crate::state_machine::{RunProgress, StageRecord};

const BUNDLE_DIR: &str = "bundle";
const CAPTURE_DIR: &str = "capture";
const CONTROLFILE_SCRIPT: &str = "create_controlfile.sql";
const TEMPFILE_SCRIPT: &str = "add_tempfiles.sql";

/// External capabilities a run talks to.
pub struct Collaborators {
    pub source: Arc<dyn SqlChannel>,
    pub target: Arc<dyn SqlChannel>,
    /// Storage-administration session on the target host.
    pub storage: Arc<dyn SqlChannel>,
    pub storage_tool: Arc<dyn StorageTool>,
    pub runner: Arc<dyn CommandRunner>,
    /// Set when the source database lives on another host.
    pub remote: Option<Arc<dyn RemoteShell>>,
}

impl Collaborators {
    pub fn new(
        source: Arc<dyn SqlChannel>,
        target: Arc<dyn SqlChannel>,
        storage: Arc<dyn SqlChannel>,
        storage_tool: Arc<dyn StorageTool>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            source,
            target,
            storage,
            storage_tool,
            runner,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteShell>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Process-backed collaborators for the configured homes and source host.
    pub fn from_config(config: &CloneConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
        let source = SqlPlus::new(&config.source_sid, Privilege::Sysdba)
            .with_home(config.source_home.clone());
        let target = SqlPlus::new(&config.target_sid, Privilege::Sysdba)
            .with_home(config.target_home.clone());
        let storage =
            SqlPlus::new(&config.asm_sid, Privilege::Sysasm).with_home(config.grid_home.clone());
        let storage_tool =
            GridTools::new(&config.asm_sid, runner.clone()).with_home(config.grid_home.clone());

        let collaborators = Self::new(
            Arc::new(source),
            Arc::new(target),
            Arc::new(storage),
            Arc::new(storage_tool),
            runner.clone(),
        );
        match &config.source_host {
            Some(host) => collaborators.with_remote(Arc::new(SshRemote::new(host, runner))),
            None => collaborators,
        }
    }
}

/// Stages completed by one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stages: Vec<StageRecord>,
}

impl RunReport {
    pub fn warnings(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter_map(|r| r.result.warning().map(|w| format!("{}: {}", r.stage, w)))
            .collect()
    }

    pub fn stage(&self, stage: CloneStage) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.result)
    }
}

/// Enter `stage`, run `work`, and record its result or attribute its failure.
async fn produce_stage<T, F>(progress: &mut RunProgress, stage: CloneStage, work: F) -> Result<T>
where
    F: Future<Output = Result<(T, StageResult)>>,
{
    progress.enter(stage).map_err(|e| progress.fail(e))?;
    match work.await {
        Ok((value, result)) => {
            progress.complete(result);
            Ok(value)
        }
        Err(e) => {
            error!(stage = %stage, error = %e, "Stage failed");
            Err(progress.fail(e))
        }
    }
}

async fn run_stage<F>(progress: &mut RunProgress, stage: CloneStage, work: F) -> Result<()>
where
    F: Future<Output = Result<StageResult>>,
{
    produce_stage(progress, stage, async { work.await.map(|result| ((), result)) }).await
}

fn load_bundle(area: &CaptureArea) -> Result<MetadataBundle> {
    area.load_bundle().map_err(|e| match e {
        BundleError::MissingFile(name) => OrchestratorError::StageState(format!(
            "{} missing from {}; run finalize first",
            name,
            area.root().display()
        )),
        other => other.into(),
    })
}

/// Top-level driver. Each entry point is one operator-visible invocation.
pub struct CloneOrchestrator {
    ctx: CloneContext,
    collaborators: Collaborators,
    binary: Option<PathBuf>,
}

impl CloneOrchestrator {
    pub fn new(ctx: CloneContext, collaborators: Collaborators) -> Self {
        Self {
            ctx,
            collaborators,
            binary: None,
        }
    }

    /// Executable shipped to the source host. Defaults to the running binary.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn context(&self) -> &CloneContext {
        &self.ctx
    }

    fn config(&self) -> &CloneConfig {
        &self.ctx.config
    }

    fn source_capture(&self) -> SourceCapture {
        SourceCapture::new(
            self.config().clone(),
            self.collaborators.source.clone(),
            self.collaborators.runner.clone(),
            self.collaborators.storage_tool.clone(),
        )
    }

    fn renamer(&self, work_dir: &Path) -> StorageRenamer {
        StorageRenamer::new(
            self.collaborators.storage.clone(),
            self.collaborators.storage_tool.clone(),
            work_dir,
        )
    }

    fn recovery(&self) -> RecoveryController {
        RecoveryController::new(self.collaborators.target.clone(), &self.config().target_sid)
    }

    fn scratch(&self) -> Result<ScratchArea> {
        ScratchArea::create(&self.ctx.work_dir, &self.ctx.run_tag(), self.config().debug)
    }

    /// Persistent area shared by separately invoked source stages.
    fn stage_area(&self) -> Result<CaptureArea> {
        let dir = self.config().stage_dir.as_ref().ok_or_else(|| {
            OrchestratorError::Config("a stage directory is required for discrete stages".into())
        })?;
        Ok(CaptureArea::create(dir)?)
    }

    fn finish(&self, mut progress: RunProgress) -> Result<RunReport> {
        progress
            .enter(CloneStage::Done)
            .map_err(|e| progress.fail(e))?;
        info!(run_id = %self.ctx.run_id, warnings = progress.warnings().len(), "Run complete");
        Ok(RunReport {
            run_id: self.ctx.run_id,
            stages: progress.history().to_vec(),
        })
    }

    /// Tear down a previous clone on the target.
    pub async fn stop(&self) -> Result<RunReport> {
        self.config().validate()?;
        let mut progress = RunProgress::new();
        self.stop_stage(&mut progress).await?;
        self.finish(progress)
    }

    /// Open the window and, when a snapshot command is configured, take the snapshot.
    pub async fn prepare(&self) -> Result<RunReport> {
        self.config().validate()?;
        let area = self.stage_area()?;
        let capture = self.source_capture();
        let mut progress = RunProgress::new();

        run_stage(&mut progress, CloneStage::Prepare, capture.prepare(&area)).await?;
        if self.config().snapshot_command.is_some() {
            run_stage(&mut progress, CloneStage::Snapshot, capture.snapshot(&area)).await?;
        }
        self.finish(progress)
    }

    /// Close the window recorded by a previous `prepare`.
    pub async fn finalize(&self) -> Result<RunReport> {
        self.config().validate()?;
        let area = self.stage_area()?;
        let mut progress = RunProgress::new();

        run_stage(
            &mut progress,
            CloneStage::Finalize,
            self.source_capture().finalize(&area),
        )
        .await?;
        self.finish(progress)
    }

    /// Target-side sequence from an archive, a capture directory, or the stage directory.
    pub async fn clone_from(&self, source: Option<&Path>) -> Result<RunReport> {
        self.config().validate()?;
        let scratch = self.scratch()?;
        let mut progress = RunProgress::new();

        let area = match source {
            Some(path) if !path.exists() => {
                return Err(OrchestratorError::Config(format!(
                    "capture {} not found",
                    path.display()
                )));
            }
            Some(archive) if archive.is_file() => {
                let dir = scratch.join(BUNDLE_DIR);
                run_stage(&mut progress, CloneStage::Transfer, async {
                    let manifest = bridge::unpack(archive.to_path_buf(), dir.clone()).await?;
                    Ok(StageResult::success(format!(
                        "{} files unpacked from {}",
                        manifest.file_count(),
                        archive.display()
                    )))
                })
                .await?;
                CaptureArea::new(dir)
            }
            Some(dir) => CaptureArea::new(dir),
            None => self.stage_area()?,
        };

        self.clone_stages(&mut progress, &area, &scratch).await?;
        self.finish(progress)
    }

    /// Full run: stop, capture on the source, clone on the target.
    pub async fn run(&self) -> Result<RunReport> {
        self.config().validate_for_snapshot()?;
        let scratch = self.scratch()?;
        let mut progress = RunProgress::new();
        info!(
            run_id = %self.ctx.run_id,
            source = %self.config().source_sid,
            target = %self.config().target_sid,
            mode = %self.config().mode.as_str(),
            "Starting clone run"
        );

        self.stop_stage(&mut progress).await?;
        let area = self.transfer_stage(&mut progress, &scratch).await?;
        self.clone_stages(&mut progress, &area, &scratch).await?;
        self.finish(progress)
    }

    /// Source-side unit of work executed on the source host: capture and pack.
    pub async fn capture_to_archive(&self, archive: &Path) -> Result<StageResult> {
        self.config().validate_for_snapshot()?;
        let scratch = self.scratch()?;
        let area = CaptureArea::create(scratch.join(CAPTURE_DIR))?;

        let result = self.source_capture().capture(&area).await?;
        let manifest = bridge::pack(area.root().to_path_buf(), archive.to_path_buf()).await?;
        info!(files = manifest.file_count(), archive = %archive.display(), "Capture packed");
        Ok(result)
    }

    fn binary(&self) -> Result<PathBuf> {
        match &self.binary {
            Some(binary) => Ok(binary.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }

    /// Return the source to normal operation after an aborted capture,
    /// on the source host when it is remote.
    pub async fn release(&self) -> Result<StageResult> {
        if let Some(remote) = &self.collaborators.remote {
            let bridge = TransferBridge::new(remote.clone(), self.config().clone(), self.binary()?);
            return bridge.release(&self.ctx.run_tag()).await;
        }

        let area = match &self.config().stage_dir {
            Some(dir) => CaptureArea::new(dir),
            None => CaptureArea::new(&self.ctx.work_dir),
        };
        self.source_capture().release(&area).await
    }

    async fn stop_stage(&self, progress: &mut RunProgress) -> Result<()> {
        let prefix = self.config().pool_prefix();
        run_stage(progress, CloneStage::Stop, async {
            let aborted = self.recovery().abort().await?;
            let dropped = self.renamer(&self.ctx.work_dir).teardown(&prefix).await?;
            let output = format!("dropped pools: [{}]", dropped.join(", "));
            Ok(if aborted {
                StageResult::success(format!("target aborted; {}", output))
            } else {
                StageResult::advisory("target instance was not running", output)
            })
        })
        .await
    }

    async fn transfer_stage(
        &self,
        progress: &mut RunProgress,
        scratch: &ScratchArea,
    ) -> Result<CaptureArea> {
        let dir = scratch.join(BUNDLE_DIR);
        run_stage(progress, CloneStage::Transfer, async {
            let Some(remote) = &self.collaborators.remote else {
                let area = CaptureArea::create(&dir)?;
                return self.source_capture().capture(&area).await;
            };

            let bridge = TransferBridge::new(remote.clone(), self.config().clone(), self.binary()?);
            let archive = bridge.fetch(&self.ctx.run_tag(), scratch.path()).await?;
            let manifest = bridge::unpack(archive, dir.clone()).await?;
            Ok(StageResult::success(format!(
                "{} files received from {}",
                manifest.file_count(),
                remote.host()
            )))
        })
        .await?;
        Ok(CaptureArea::new(dir))
    }

    async fn clone_stages(
        &self,
        progress: &mut RunProgress,
        area: &CaptureArea,
        scratch: &ScratchArea,
    ) -> Result<()> {
        let config = self.config();
        let recovery = self.recovery();
        let transformer = MetadataTransformer::new(config);
        let pfile = scratch.join(format!("init{}.ora", config.target_sid));

        let bundle = produce_stage(progress, CloneStage::Rename, async {
            let bundle = load_bundle(area)?;
            let namespace = transformer.namespace(&bundle)?;
            let renamer = self.renamer(scratch.path());
            let renamed = renamer.rename_all(&namespace).await?;
            let mounted = renamer.mount_all(&namespace).await?;
            let result =
                StageResult::success(format!("{}; {}", renamed.output(), mounted.output()));
            Ok((bundle, result))
        })
        .await?;

        let transformed = produce_stage(progress, CloneStage::Metadata, async {
            let transformed = transformer.transform(&bundle)?;
            tokio::fs::write(&pfile, &transformed.parameter_file).await?;
            tokio::fs::write(scratch.join(CONTROLFILE_SCRIPT), &transformed.create_controlfile)
                .await?;
            tokio::fs::write(scratch.join(TEMPFILE_SCRIPT), &transformed.tempfiles).await?;
            tokio::fs::create_dir_all(config.audit_dest()).await?;

            recovery.start_nomount(&pfile).await?;
            recovery
                .create_controlfile(&transformed.create_controlfile)
                .await?;
            let result = StageResult::success(format!(
                "control file created with data in {}",
                transformed.paths.data
            ));
            Ok((transformed, result))
        })
        .await?;

        run_stage(progress, CloneStage::Recover, async {
            let recovered = recovery.recover(&bundle, &area.archive_dir()).await?;
            let opened = recovery.open_resetlogs(&pfile).await?;
            Ok(StageResult::success(format!(
                "{}; {}",
                recovered.output(),
                opened.output()
            )))
        })
        .await?;

        run_stage(
            progress,
            CloneStage::TempFix,
            recovery.fix_tempfiles(&transformed.tempfiles),
        )
        .await?;

        run_stage(
            progress,
            CloneStage::Restart,
            recovery.restart(config.start_after_create),
        )
        .await
    }
}
