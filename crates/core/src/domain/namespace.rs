use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Extract the storage pool from a pool-qualified file path.
///
/// `+DATA/ORCL/DATAFILE/system.256.1` yields `DATA`. Paths that do not start
/// with `+` live on a plain filesystem and yield `None`.
pub fn pool_of_path(path: &str) -> Option<String> {
    let rest = path.trim().trim_matches('\'').strip_prefix('+')?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name.to_ascii_uppercase())
    }
}

fn validate_pool_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 30
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidPoolName(name.to_string()))
    }
}

/// Original pool name to renamed pool name, one entry per pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageNamespaceMap {
    prefix: String,
    entries: BTreeMap<String, String>,
}

impl StorageNamespaceMap {
    /// Build the map from the (possibly repeating) pool names of an inventory.
    ///
    /// Names already carrying the prefix map to themselves, so a second pass
    /// over an already renamed inventory never double-prefixes.
    pub fn build<I, S>(prefix: &str, pools: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefix = prefix.trim().to_ascii_uppercase();
        validate_pool_name(&prefix)?;

        let mut entries = BTreeMap::new();
        for pool in pools {
            let pool = pool.as_ref().trim().trim_start_matches('+').to_ascii_uppercase();
            validate_pool_name(&pool)?;
            let renamed = Self::prefixed_name(&prefix, &pool);
            validate_pool_name(&renamed)?;
            entries.insert(pool, renamed);
        }

        Ok(Self { prefix, entries })
    }

    /// `<prefix>_<base>`, unless `base` already carries the prefix.
    pub fn prefixed_name(prefix: &str, base: &str) -> String {
        let marker = format!("{}_", prefix);
        if base.starts_with(&marker) {
            base.to_string()
        } else {
            format!("{}{}", marker, base)
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn renamed(&self, original: &str) -> Option<&str> {
        self.entries
            .get(&original.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Whether the pool actually needs a rename (false for already prefixed pools).
    pub fn needs_rename(&self, original: &str) -> bool {
        self.renamed(original)
            .map(|renamed| !renamed.eq_ignore_ascii_case(original))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn renamed_pools(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
