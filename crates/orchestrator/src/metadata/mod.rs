//! Pure rewrite of captured source metadata for the target instance.
//!
//! Nothing here touches a database or the filesystem, so a transform of the
//! same bundle and configuration always yields the same text.

pub mod controlfile;
pub mod grammar;
pub mod parameters;

use clone_core::{pool_of_path, CloneConfig, MetadataBundle, StorageNamespaceMap};
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;

pub use controlfile::{ControlFileScript, CreateControlfile, TempfileStatement};
pub use parameters::ParameterRewrite;

use crate::error::{OrchestratorError, Result};

fn pool_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(^|[^A-Za-z0-9_$#])\+([A-Za-z][A-Za-z0-9_$#]*)").expect("valid pool regex")
    })
}

/// Replace `+POOL` references with the renamed pool. Unknown pools are left alone.
pub fn rewrite_pools(text: &str, namespace: &StorageNamespaceMap) -> String {
    pool_reference_pattern()
        .replace_all(text, |caps: &Captures| match namespace.renamed(&caps[2]) {
            Some(renamed) => format!("{}+{}", &caps[1], renamed),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Destinations the target instance writes new files to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPaths {
    pub data: String,
    pub redo: String,
    pub temp: String,
    pub archive: String,
}

impl TargetPaths {
    /// Configured destinations, defaulting to the renamed pool of the first datafile.
    pub fn resolve(
        config: &CloneConfig,
        namespace: &StorageNamespaceMap,
        first_datafile: Option<&str>,
    ) -> Result<Self> {
        let derived = first_datafile
            .and_then(pool_of_path)
            .and_then(|pool| namespace.renamed(&pool).map(|r| format!("+{}", r)));
        let data = config.data_dest.clone().or(derived).ok_or_else(|| {
            OrchestratorError::Config(
                "data destination not configured and not derivable from the datafiles".into(),
            )
        })?;

        Ok(Self {
            redo: config.redo_dest.clone().unwrap_or_else(|| data.clone()),
            temp: config.temp_dest.clone().unwrap_or_else(|| data.clone()),
            archive: config.archive_dest.clone().unwrap_or_else(|| data.clone()),
            data,
        })
    }
}

/// Output of [`MetadataTransformer::transform`].
#[derive(Debug, Clone)]
pub struct TransformedMetadata {
    pub namespace: StorageNamespaceMap,
    pub paths: TargetPaths,
    pub parameter_file: String,
    pub create_controlfile: String,
    pub tempfiles: String,
}

pub struct MetadataTransformer<'a> {
    config: &'a CloneConfig,
}

impl<'a> MetadataTransformer<'a> {
    pub fn new(config: &'a CloneConfig) -> Self {
        Self { config }
    }

    /// Distinct storage pools referenced by the bundle.
    pub fn storage_inventory(bundle: &MetadataBundle) -> Result<BTreeSet<String>> {
        let script = ControlFileScript::parse(bundle.controlfile_script())?;
        let pools = script
            .referenced_paths()
            .iter()
            .map(String::as_str)
            .chain(bundle.disk_inventory().iter().map(String::as_str))
            .filter_map(pool_of_path)
            .collect();
        Ok(pools)
    }

    pub fn namespace(&self, bundle: &MetadataBundle) -> Result<StorageNamespaceMap> {
        let pools = Self::storage_inventory(bundle)?;
        Ok(StorageNamespaceMap::build(&self.config.pool_prefix(), pools)?)
    }

    pub fn transform(&self, bundle: &MetadataBundle) -> Result<TransformedMetadata> {
        let script = ControlFileScript::parse(bundle.controlfile_script())?;
        let namespace = self.namespace(bundle)?;
        let paths = TargetPaths::resolve(self.config, &namespace, script.first_datafile().as_deref())?;

        let parameter_file = ParameterRewrite {
            source_sid: bundle.source_sid(),
            target_sid: &self.config.target_sid,
            namespace: &namespace,
            paths: &paths,
            sga_target_mb: self.config.sga_target_mb,
            pga_target_mb: self.config.pga_target_mb,
            audit_dest: self.config.audit_dest().display().to_string(),
            diagnostic_dest: self.config.oracle_base.display().to_string(),
        }
        .apply(bundle.parameter_text());

        let create_controlfile = script.render_create(&self.config.target_sid, &namespace);
        let tempfiles = script.render_tempfiles(&paths.temp, self.config.tempfile_size.as_deref());

        debug!(
            pools = namespace.len(),
            tempfiles = script.tempfiles.len(),
            "Transformed source metadata"
        );

        Ok(TransformedMetadata {
            namespace,
            paths,
            parameter_file,
            create_controlfile,
            tempfiles,
        })
    }
}
