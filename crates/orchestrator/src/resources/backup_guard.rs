//! RAII guard for source backup mode.
//!
//! Backup mode held on the source must be released on every exit path of a
//! capture, including errors and interruption.

use std::sync::Arc;
use tracing::{debug, warn};

use channels::SqlChannel;

use crate::error::Result;
use crate::window::end_backup;

/// RAII guard for a source held in backup mode.
///
/// Call [`BackupModeGuard::release`] on error paths to compensate with a
/// reported outcome, and [`BackupModeGuard::disarm`] once the window closed
/// normally. A guard dropped while still armed spawns a best-effort release.
///
/// # Example
///
/// ```ignore
/// let mut guard = BackupModeGuard::arm(source.clone());
/// if let Err(e) = take_snapshot().await {
///     guard.release().await?;
///     return Err(e);
/// }
/// guard.disarm();
/// ```
pub struct BackupModeGuard {
    channel: Arc<dyn SqlChannel>,
    armed: bool,
}

impl BackupModeGuard {
    pub fn arm(channel: Arc<dyn SqlChannel>) -> Self {
        debug!(instance = %channel.name(), "Backup mode guard armed");
        Self {
            channel,
            armed: true,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Backup mode was released through the normal path.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Release backup mode now.
    pub async fn release(&mut self) -> Result<()> {
        if !self.armed {
            return Ok(());
        }
        debug!(instance = %self.channel.name(), "Releasing backup mode");
        end_backup(self.channel.as_ref()).await?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for BackupModeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let channel = self.channel.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(instance = %channel.name(), "Spawning backup mode release task");
                handle.spawn(async move {
                    if let Err(e) = end_backup(channel.as_ref()).await {
                        warn!(
                            instance = %channel.name(),
                            error = %e,
                            "Backup mode release failed in Drop"
                        );
                    }
                });
            }
            Err(_) => {
                warn!(
                    instance = %channel.name(),
                    "Backup mode left active; no runtime available to release it"
                );
            }
        }
    }
}
