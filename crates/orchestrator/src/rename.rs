use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use channels::{SqlChannel, StorageTool};
use clone_core::{StageResult, StorageNamespaceMap};

use crate::error::{OrchestratorError, Result};

pub const CANDIDATE_DISKS_SQL: &str = "select path from v$asm_disk \
     where group_number = 0 and header_status = 'MEMBER' order by path;";

/// Renames and mounts the cloned storage pools on the target host.
pub struct StorageRenamer {
    storage: Arc<dyn SqlChannel>,
    tool: Arc<dyn StorageTool>,
    work_dir: PathBuf,
}

impl StorageRenamer {
    pub fn new(
        storage: Arc<dyn SqlChannel>,
        tool: Arc<dyn StorageTool>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            tool,
            work_dir: work_dir.into(),
        }
    }

    /// Unmounted member disks grouped by the pool name in their header.
    pub async fn member_disks(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let output = self.storage.execute_checked(CANDIDATE_DISKS_SQL).await?;
        let mut pools: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for disk in output.rows() {
            if let Some(pool) = self.tool.pool_of_disk(disk).await? {
                pools.entry(pool.to_ascii_uppercase()).or_default().push(disk.to_string());
            }
        }
        debug!(pools = pools.len(), "Discovered unmounted pool members");
        Ok(pools)
    }

    /// Rename every pool of the map, aborting on the first failure.
    ///
    /// Pools already renamed are left alone. A failure leaves earlier renames
    /// in place.
    pub async fn rename_all(&self, namespace: &StorageNamespaceMap) -> Result<StageResult> {
        let members = self.member_disks().await?;
        let mut renamed = Vec::new();
        let mut skipped = Vec::new();

        for (pool, target) in namespace.iter() {
            if !namespace.needs_rename(pool) {
                info!(pool = %pool, "Pool already carries the prefix");
                skipped.push(pool.to_string());
                continue;
            }

            let Some(disks) = members.get(pool) else {
                if members.contains_key(target) {
                    info!(pool = %pool, renamed = %target, "Pool already renamed");
                    skipped.push(pool.to_string());
                    continue;
                }
                return Err(OrchestratorError::rename_failed(
                    pool,
                    "no unmounted member disks found",
                ));
            };

            let config_file = self
                .work_dir
                .join(format!("renamedg_{}.conf", pool.to_ascii_lowercase()));
            info!(pool = %pool, renamed = %target, disks = disks.len(), "Renaming pool");
            if let Err(e) = self.tool.rename_pool(pool, target, disks, &config_file).await {
                error!(pool = %pool, error = %e, "Pool rename failed");
                return Err(OrchestratorError::rename_failed(pool, e.to_string()));
            }
            renamed.push(target.to_string());
        }

        Ok(StageResult::success(format!(
            "renamed: [{}]; unchanged: [{}]",
            renamed.join(", "),
            skipped.join(", ")
        )))
    }

    async fn pool_state(&self, pool: &str) -> Result<Option<String>> {
        let output = self
            .storage
            .execute_checked(&format!(
                "select state from v$asm_diskgroup where name = '{}';",
                pool
            ))
            .await?;
        Ok(output.first_row().map(|s| s.to_ascii_uppercase()))
    }

    /// Mount each renamed pool; pools already mounted are skipped.
    pub async fn mount_all(&self, namespace: &StorageNamespaceMap) -> Result<StageResult> {
        let mut mounted = Vec::new();

        for pool in namespace.renamed_pools() {
            let state = self
                .pool_state(pool)
                .await
                .map_err(|e| OrchestratorError::mount_failed(pool, e.to_string()))?;
            if state.as_deref() == Some("MOUNTED") {
                debug!(pool = %pool, "Pool already mounted");
                continue;
            }

            info!(pool = %pool, "Mounting pool");
            self.storage
                .execute_checked(&format!("alter diskgroup {} mount;", pool))
                .await
                .map_err(|e| {
                    error!(pool = %pool, error = %e, "Pool mount failed");
                    OrchestratorError::mount_failed(pool, e.to_string())
                })?;
            mounted.push(pool.to_string());
        }

        Ok(StageResult::success(format!("mounted: [{}]", mounted.join(", "))))
    }

    /// Drop every pool whose name carries `prefix`, including contents.
    pub async fn teardown(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_ascii_uppercase();
        let output = self
            .storage
            .execute_checked(&format!(
                "select name || ' ' || state from v$asm_diskgroup \
                 where name like '{}\\_%' escape '\\' order by name;",
                prefix
            ))
            .await?;

        let mut dropped = Vec::new();
        for row in output.rows() {
            let mut fields = row.split_whitespace();
            let (Some(name), state) = (fields.next(), fields.next().unwrap_or("")) else {
                continue;
            };
            let force = if state.eq_ignore_ascii_case("MOUNTED") { "" } else { "force " };
            warn!(pool = %name, "Dropping pool including contents");
            self.storage
                .execute_checked(&format!("drop diskgroup {} {}including contents;", name, force))
                .await?;
            dropped.push(name.to_string());
        }
        Ok(dropped)
    }
}
