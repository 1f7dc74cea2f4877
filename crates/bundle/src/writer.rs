//! Capture archive writer.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use tracing::{debug, info};
use xxhash_rust::xxh3::Xxh3;

use crate::error::{BundleError, Result};
use crate::manifest::{BundleManifest, MANIFEST_FILE};

const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Stream a file through xxh3 without loading it whole.
pub(crate) fn xxh3_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:016x}", hasher.digest()))
}

/// Relative archive paths of every regular file below `root`, sorted.
fn collect_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let rel = path
                    .strip_prefix(root)
                    .map_err(|e| BundleError::archive(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                if rel != MANIFEST_FILE {
                    files.push((path, rel));
                }
            }
        }
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Packs a capture directory into a `.tar.zst` archive.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// failed pack never leaves a truncated archive at the destination.
pub struct BundleWriter {
    compression_level: i32,
}

impl Default for BundleWriter {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl BundleWriter {
    pub fn new(compression_level: i32) -> Self {
        Self { compression_level }
    }

    pub fn pack(&self, source_dir: &Path, archive: &Path) -> Result<BundleManifest> {
        let temp_path = archive.with_extension("tmp");

        if let Some(parent) = archive.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        match self.pack_inner(source_dir, &temp_path) {
            Ok(manifest) => {
                fs::rename(&temp_path, archive)?;
                info!(
                    archive = %archive.display(),
                    files = manifest.file_count(),
                    "Capture bundle written"
                );
                Ok(manifest)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    fn pack_inner(&self, source_dir: &Path, path: &Path) -> Result<BundleManifest> {
        let files = collect_files(source_dir)?;
        if files.is_empty() {
            return Err(BundleError::InvalidBundle(format!(
                "nothing to pack in {}",
                source_dir.display()
            )));
        }

        let mut manifest = BundleManifest::new(env!("CARGO_PKG_VERSION"));

        let file = File::create(path)?;
        let zstd_writer = zstd::Encoder::new(BufWriter::new(file), self.compression_level)
            .map_err(|e| BundleError::compression(format!("zstd encoder: {}", e)))?
            .auto_finish();
        let mut tar_builder = Builder::new(zstd_writer);

        for (full, rel) in &files {
            debug!(file = %rel, "Adding to bundle");
            manifest.add_checksum(rel.clone(), xxh3_file(full)?);
            tar_builder
                .append_path_with_name(full, rel)
                .map_err(|e| BundleError::archive(format!("append '{}': {}", rel, e)))?;
        }

        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        let mut header = Header::new_gnu();
        header
            .set_path(MANIFEST_FILE)
            .map_err(|e| BundleError::archive(format!("set path '{}': {}", MANIFEST_FILE, e)))?;
        header.set_size(manifest_json.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        tar_builder
            .append(&header, manifest_json.as_slice())
            .map_err(|e| BundleError::archive(format!("append '{}': {}", MANIFEST_FILE, e)))?;

        let zstd_writer = tar_builder
            .into_inner()
            .map_err(|e| BundleError::archive(format!("tar finish: {}", e)))?;
        drop(zstd_writer);

        Ok(manifest)
    }
}
