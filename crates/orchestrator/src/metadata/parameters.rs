use regex::Regex;
use std::sync::OnceLock;

use super::{rewrite_pools, TargetPaths};
use clone_core::StorageNamespaceMap;

fn directive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:([A-Za-z0-9_$#*]+)\.)?([A-Za-z_][A-Za-z0-9_$#]*)\s*=\s*(.*)$")
            .expect("valid directive regex")
    })
}

/// Directives dropped from the source file.
const DROPPED: &[&str] = &[
    // storage locations
    "control_files",
    "db_create_file_dest",
    "db_recovery_file_dest",
    "db_recovery_file_dest_size",
    "log_archive_duplex_dest",
    "standby_archive_dest",
    "spfile",
    // diagnostics
    "audit_file_dest",
    "diagnostic_dest",
    "background_dump_dest",
    "user_dump_dest",
    "core_dump_dest",
    // archive naming
    "log_archive_format",
    // identity
    "db_unique_name",
    "instance_name",
    "service_names",
    "instance_number",
    "thread",
    "cluster_database",
    "cluster_database_instances",
    "remote_listener",
    // memory
    "memory_target",
    "memory_max_target",
    "sga_target",
    "sga_max_size",
    "pga_aggregate_target",
    "pga_aggregate_limit",
    "db_cache_size",
    "db_keep_cache_size",
    "db_recycle_cache_size",
    "shared_pool_size",
    "large_pool_size",
    "java_pool_size",
    "streams_pool_size",
    "inmemory_size",
    "result_cache_max_size",
];

fn is_block_cache(name: &str) -> bool {
    name.strip_prefix("db_")
        .and_then(|rest| rest.strip_suffix("k_cache_size"))
        .map(|size| !size.is_empty() && size.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_dropped(name: &str) -> bool {
    DROPPED.contains(&name)
        || name.starts_with("db_create_online_log_dest_")
        || name.starts_with("log_archive_dest")
        || is_block_cache(name)
}

/// Inputs of the parameter rewrite besides the source text.
pub struct ParameterRewrite<'a> {
    pub source_sid: &'a str,
    pub target_sid: &'a str,
    pub namespace: &'a StorageNamespaceMap,
    pub paths: &'a TargetPaths,
    pub sga_target_mb: u64,
    pub pga_target_mb: u64,
    pub audit_dest: String,
    pub diagnostic_dest: String,
}

#[derive(Debug)]
struct Directive {
    name: String,
    value: String,
    instance_specific: bool,
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn replace_ignore_case(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_string();
    }
    let pattern = format!("(?i){}", regex::escape(needle));
    match Regex::new(&pattern) {
        Ok(re) => re
            .replace_all(haystack, regex::NoExpand(replacement))
            .into_owned(),
        Err(_) => haystack.to_string(),
    }
}

impl ParameterRewrite<'_> {
    /// Rewrite a parameter file for the target instance.
    ///
    /// Output is deterministic: surviving directives keep their source order,
    /// are written with the `*` scope, and are followed by the directives
    /// managed here in a fixed order.
    pub fn apply(&self, text: &str) -> String {
        let mut directives: Vec<Directive> = Vec::new();
        // Index of the directive the previous line wrote, for continuations.
        let mut last_kept: Option<usize> = None;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(caps) = directive_pattern().captures(line) else {
                // Continuation of a multi-line value.
                if let Some(directive) = last_kept.and_then(|pos| directives.get_mut(pos)) {
                    directive.value.push(' ');
                    directive.value.push_str(&rewrite_pools(line, self.namespace));
                }
                continue;
            };
            last_kept = None;

            let scope = caps.get(1).map(|m| m.as_str());
            let name = caps[2].to_ascii_lowercase();
            let value = caps[3].trim();

            if name.starts_with("__") {
                continue;
            }
            let instance_specific = match scope {
                None | Some("*") => false,
                Some(sid) if sid.eq_ignore_ascii_case(self.source_sid) => true,
                Some(_) => continue,
            };
            if is_dropped(&name) {
                continue;
            }

            let value = match name.as_str() {
                "db_name" => quote(&self.target_sid.to_ascii_uppercase()),
                "dispatchers" => replace_ignore_case(value, self.source_sid, self.target_sid),
                _ => rewrite_pools(value, self.namespace),
            };

            match directives.iter().position(|d| d.name == name) {
                Some(pos) => {
                    if instance_specific || !directives[pos].instance_specific {
                        directives[pos] = Directive {
                            name,
                            value,
                            instance_specific,
                        };
                        last_kept = Some(pos);
                    }
                }
                None => {
                    directives.push(Directive {
                        name,
                        value,
                        instance_specific,
                    });
                    last_kept = Some(directives.len() - 1);
                }
            }
        }

        let mut managed = Vec::new();
        if !directives.iter().any(|d| d.name == "db_name") {
            managed.push(("db_name", quote(&self.target_sid.to_ascii_uppercase())));
        }
        managed.extend([
            ("db_create_file_dest", quote(&self.paths.data)),
            ("db_create_online_log_dest_1", quote(&self.paths.redo)),
            (
                "log_archive_dest_1",
                quote(&format!("LOCATION={}", self.paths.archive)),
            ),
            ("sga_target", format!("{}M", self.sga_target_mb)),
            ("pga_aggregate_target", format!("{}M", self.pga_target_mb)),
            ("audit_file_dest", quote(&self.audit_dest)),
            ("diagnostic_dest", quote(&self.diagnostic_dest)),
        ]);

        let mut out = String::new();
        for directive in &directives {
            out.push_str(&format!("*.{}={}\n", directive.name, directive.value));
        }
        for (name, value) in managed {
            out.push_str(&format!("*.{}={}\n", name, value));
        }
        out
    }
}
