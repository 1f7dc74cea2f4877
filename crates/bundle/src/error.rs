use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Missing required file in bundle: {0}")]
    MissingFile(String),

    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Unsupported format version: {version}")]
    UnsupportedVersion { version: u32 },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Capture state error: {0}")]
    Capture(#[from] clone_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BundleError {
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    pub fn missing_file(name: impl Into<String>) -> Self {
        Self::MissingFile(name.into())
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
