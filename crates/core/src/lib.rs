//! Core data model for snapshot-based database cloning.
//!
//! Everything in this crate is plain data: sessions, the consistency window,
//! the captured metadata bundle, the storage namespace map and stage results.
//! No I/O happens here.

pub mod config;
pub mod domain;
pub mod error;

pub use config::{CloneConfig, CloneContext};
pub use domain::*;
pub use error::{CoreError, Result};
