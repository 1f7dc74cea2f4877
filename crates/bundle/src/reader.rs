//! Capture archive reader.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tar::Archive;
use tracing::{debug, info};

use crate::error::{BundleError, Result};
use crate::manifest::{BundleManifest, BUNDLE_FORMAT_VERSION, MANIFEST_FILE};
use crate::writer::xxh3_file;

pub struct BundleReader;

impl BundleReader {
    /// Extract an archive into `dest` and verify it against its manifest.
    pub fn unpack(archive: &Path, dest: &Path) -> Result<BundleManifest> {
        fs::create_dir_all(dest)?;

        let file = File::open(archive)?;
        let decoder = zstd::Decoder::new(BufReader::new(file))
            .map_err(|e| BundleError::compression(format!("zstd decode: {}", e)))?;
        let mut tar = Archive::new(decoder);

        for entry in tar
            .entries()
            .map_err(|e| BundleError::archive(e.to_string()))?
        {
            let mut entry = entry.map_err(|e| BundleError::archive(e.to_string()))?;
            let entry_path = entry
                .path()
                .map_err(|e| BundleError::archive(e.to_string()))?
                .to_string_lossy()
                .to_string();
            let inside = entry
                .unpack_in(dest)
                .map_err(|e| BundleError::archive(format!("unpack {}: {}", entry_path, e)))?;
            if !inside {
                return Err(BundleError::InvalidBundle(format!(
                    "entry escapes the destination: {}",
                    entry_path
                )));
            }
            debug!(file = %entry_path, "Extracted");
        }

        let manifest = Self::read_manifest(dest)?;
        Self::verify(dest, &manifest)?;

        info!(
            archive = %archive.display(),
            files = manifest.file_count(),
            "Capture bundle extracted"
        );
        Ok(manifest)
    }

    pub fn read_manifest(dir: &Path) -> Result<BundleManifest> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(BundleError::missing_file(MANIFEST_FILE));
        }
        let manifest: BundleManifest = serde_json::from_slice(&fs::read(&path)?)?;
        if manifest.format_version != BUNDLE_FORMAT_VERSION {
            return Err(BundleError::UnsupportedVersion {
                version: manifest.format_version,
            });
        }
        Ok(manifest)
    }

    /// Check every file listed in the manifest against its checksum.
    pub fn verify(dir: &Path, manifest: &BundleManifest) -> Result<()> {
        for (rel, expected) in &manifest.checksums {
            let path = dir.join(rel);
            if !path.exists() {
                return Err(BundleError::missing_file(rel.clone()));
            }
            let actual = xxh3_file(&path)?;
            if &actual != expected {
                return Err(BundleError::ChecksumMismatch {
                    file: rel.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::BundleWriter;
    use tempfile::TempDir;

    fn populate(dir: &Path) {
        fs::write(dir.join("init.ora"), "*.db_name='ORCL'\n").unwrap();
        fs::write(dir.join("control.sql"), "CREATE CONTROLFILE REUSE DATABASE \"ORCL\"\n").unwrap();
        fs::create_dir_all(dir.join("arch")).unwrap();
        fs::write(dir.join("arch/1_100_1.arc"), vec![7u8; 4096]).unwrap();
    }

    #[test]
    fn test_pack_and_unpack() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        populate(src.path());

        let archive = out.path().join("capture.tar.zst");
        let written = BundleWriter::default().pack(src.path(), &archive).unwrap();
        assert_eq!(written.file_count(), 3);
        assert!(written.checksums.contains_key("arch/1_100_1.arc"));
        assert!(!out.path().join("capture.tar.tmp").exists());

        let read = BundleReader::unpack(&archive, dest.path()).unwrap();
        assert_eq!(read.checksums, written.checksums);
        assert_eq!(
            fs::read_to_string(dest.path().join("init.ora")).unwrap(),
            "*.db_name='ORCL'\n"
        );
        assert_eq!(fs::read(dest.path().join("arch/1_100_1.arc")).unwrap().len(), 4096);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        populate(src.path());

        let archive = out.path().join("capture.tar.zst");
        BundleWriter::default().pack(src.path(), &archive).unwrap();
        let manifest = BundleReader::unpack(&archive, dest.path()).unwrap();

        fs::write(dest.path().join("control.sql"), "tampered").unwrap();
        let err = BundleReader::verify(dest.path(), &manifest).unwrap_err();
        assert!(matches!(err, BundleError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_pack_empty_dir_fails() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let result = BundleWriter::default().pack(src.path(), &out.path().join("x.tar.zst"));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            BundleReader::read_manifest(dir.path()),
            Err(BundleError::MissingFile(_))
        ));
    }
}
