use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BUNDLE_FORMAT_VERSION: u32 = 1;
pub const BUNDLE_EXTENSION: &str = "tar.zst";
pub const MANIFEST_FILE: &str = "MANIFEST.json";

/// Compute xxh3 hash of data and return as hex string
pub fn xxh3_hex(data: &[u8]) -> String {
    use xxhash_rust::xxh3::xxh3_64;
    format!("{:016x}", xxh3_64(data))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleManifest {
    pub format_version: u32,
    /// Tool version that produced the bundle.
    pub producer_version: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    pub checksum_algorithm: String,
    /// Relative path to hex checksum.
    pub checksums: BTreeMap<String, String>,
}

impl BundleManifest {
    pub fn new(producer_version: impl Into<String>) -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            producer_version: producer_version.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            checksum_algorithm: "xxh3".to_string(),
            checksums: BTreeMap::new(),
        }
    }

    pub fn add_checksum(&mut self, path: impl Into<String>, checksum: impl Into<String>) {
        self.checksums.insert(path.into(), checksum.into());
    }

    pub fn file_count(&self) -> usize {
        self.checksums.len()
    }
}
