mod metadata;
mod namespace;
mod session;
mod stage;
mod window;

pub use metadata::{ArchivedLog, MetadataBundle};
pub use namespace::{pool_of_path, StorageNamespaceMap};
pub use session::DbStatus;
pub use stage::{CloneStage, StageResult};
pub use window::{ConsistencyWindow, WindowMode};
