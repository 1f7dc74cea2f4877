//! RAII resource guards for automatic cleanup.
//!
//! - [`BackupModeGuard`] - Releases source backup mode on every exit path
//! - [`ScratchArea`] - Removes the run's scratch directory unless kept for debugging

mod backup_guard;
mod scratch_guard;

pub use backup_guard::BackupModeGuard;
pub use scratch_guard::ScratchArea;
