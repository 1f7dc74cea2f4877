//! Collaborator channels used by the clone orchestrator.
//!
//! Each external capability sits behind a small async trait with a
//! process-backed implementation:
//!
//! - [`SqlChannel`] - administrative SQL session (database or storage scope)
//! - [`CommandRunner`] - opaque executables such as the storage snapshot
//! - [`StorageTool`] - disk header read, two-phase pool rename, file copy-out
//! - [`RemoteShell`] - secure copy and remote execution

pub mod command;
pub mod error;
pub mod remote;
pub mod sql;
pub mod sqlplus;
pub mod storage;

pub use command::{CommandOutput, CommandRunner, ProcessRunner};
pub use error::{ChannelError, Result};
pub use remote::{RemoteShell, SshRemote};
pub use sql::{DbDiagnostic, SqlChannel, SqlOutput};
pub use sqlplus::{Privilege, SqlPlus};
pub use storage::{GridTools, StorageTool};
