//! Snapshot-based database clone orchestration.
//!
//! Source side: [`window`] opens and closes the consistency window,
//! [`snapshot`] runs the storage snapshot inside it, [`archive_logs`] copies
//! the redo generated meanwhile and [`capture`] ties them to a capture area.
//! Target side: [`rename`] gives the snapshot pools their own namespace,
//! [`metadata`] rewrites the captured parameters and control-file script, and
//! [`recovery`] brings the clone up. [`bridge`] moves the capture between
//! hosts and [`executor`] drives the stage sequence.

pub mod archive_logs;
pub mod bridge;
pub mod capture;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod recovery;
pub mod rename;
pub mod resources;
pub mod snapshot;
pub mod state_machine;
pub mod window;

#[cfg(test)]
mod test_support;

pub use capture::SourceCapture;
pub use error::{OrchestratorError, Result, Severity};
pub use executor::{CloneOrchestrator, Collaborators, RunReport};
pub use metadata::{MetadataTransformer, TransformedMetadata};
pub use recovery::RecoveryController;
pub use rename::StorageRenamer;
pub use state_machine::{CloneStateMachine, RunProgress, StageRecord};
pub use window::WindowController;
