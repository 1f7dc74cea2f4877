//! Transportable capture archive.
//!
//! The capture area written on the source host is packed into a single
//! `.tar.zst` file with a `MANIFEST.json` listing xxh3 checksums, copied to the
//! target host and unpacked into that run's scratch area.
//!
//! ```text
//! MANIFEST.json      manifest with per-file checksums
//! capture.json       window markers, source identifier, archived log list
//! init.ora           captured parameter text
//! control.sql        control-file reconstruction script
//! inventory.txt      storage inventory query result
//! arch/              archived redo copies
//! ```

pub mod error;
pub mod layout;
pub mod manifest;
pub mod reader;
pub mod writer;

pub use error::{BundleError, Result};
pub use layout::{CaptureArea, CaptureState};
pub use manifest::{xxh3_hex, BundleManifest, BUNDLE_EXTENSION, BUNDLE_FORMAT_VERSION};
pub use reader::BundleReader;
pub use writer::BundleWriter;
