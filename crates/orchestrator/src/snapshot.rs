use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use channels::CommandRunner;
use clone_core::ConsistencyWindow;

use crate::error::{OrchestratorError, Result};

/// Runs the opaque storage snapshot executable.
pub struct SnapshotInvoker {
    runner: Arc<dyn CommandRunner>,
    command: String,
}

impl SnapshotInvoker {
    pub fn new(runner: Arc<dyn CommandRunner>, command: impl Into<String>) -> Self {
        Self {
            runner,
            command: command.into(),
        }
    }

    /// Run the snapshot once, inside an open window. Returns the invocation instant.
    pub async fn invoke(&self, window: &ConsistencyWindow) -> Result<DateTime<Utc>> {
        if window.is_closed() {
            return Err(OrchestratorError::Snapshot(
                "consistency window is already closed".to_string(),
            ));
        }

        let at = Utc::now();
        info!(command = %self.command, "Invoking storage snapshot");
        self.runner
            .run(&self.command, &[], &[])
            .await
            .and_then(|output| output.check("snapshot command"))
            .map_err(|e| OrchestratorError::Snapshot(e.to_string()))?;
        info!("Storage snapshot complete");
        Ok(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingRunner;
    use channels::CommandOutput;
    use clone_core::WindowMode;

    #[tokio::test]
    async fn test_invoke_without_arguments() {
        let runner = Arc::new(RecordingRunner::new());
        let invoker = SnapshotInvoker::new(runner.clone(), "/opt/storage/bin/snap-orcl");
        let window = ConsistencyWindow::open(WindowMode::Hot, 100, 5000);

        let at = invoker.invoke(&window).await.unwrap();
        assert!(at >= window.opened_at);
        assert_eq!(
            runner.calls(),
            vec![("/opt/storage/bin/snap-orcl".to_string(), vec![])]
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_fatal() {
        let runner = Arc::new(
            RecordingRunner::new().respond("snap", CommandOutput::failed(3, "array busy")),
        );
        let invoker = SnapshotInvoker::new(runner, "snap");
        let window = ConsistencyWindow::open(WindowMode::Hot, 100, 5000);

        let err = invoker.invoke(&window).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("array busy"));
    }

    #[tokio::test]
    async fn test_refuses_closed_window() {
        let runner = Arc::new(RecordingRunner::new());
        let invoker = SnapshotInvoker::new(runner.clone(), "snap");
        let mut window = ConsistencyWindow::open(WindowMode::Hot, 100, 5000);
        window.close(101, 5001).unwrap();

        assert!(invoker.invoke(&window).await.is_err());
        assert!(runner.calls().is_empty());
    }
}
