//! Validate applied migrations against local files.
//!
//! Checksum mismatches and missing files are aggregated into the report,
//! never raised. The migrate path deliberately does not run these checks —
//! it trusts the history row and skips.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::CausewayConfig;
use crate::db::SqlClient;
use crate::error::{CausewayError, Result};
use crate::history;
use crate::migration::{scan_migrations, MigrationKind, ResolvedMigration};
use crate::ProgressCallbacks;

/// Report returned by the validate command.
#[derive(Debug, Serialize)]
pub struct ValidateReport {
    /// True when no issues were found.
    pub valid: bool,
    /// Number of history rows checked against disk.
    pub validated_count: usize,
    /// Hard findings: missing files and checksum drift.
    pub issues: Vec<String>,
    /// Repair-able findings: failed rows, scanner warnings.
    pub warnings: Vec<String>,
}

/// Execute the validate command.
pub async fn execute(
    client: &mut SqlClient,
    config: &CausewayConfig,
    callbacks: &ProgressCallbacks,
) -> Result<ValidateReport> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;

    let mut warnings: Vec<String> = Vec::new();

    if !history::exists(client, schema, table).await? {
        warnings.push("Schema history table does not exist; nothing to validate.".to_string());
        return Ok(ValidateReport {
            valid: true,
            validated_count: 0,
            issues: Vec::new(),
            warnings,
        });
    }

    let discovered = scan_migrations(&config.migrations.locations, |w| {
        log::warn!("{}", w);
        callbacks.warning(w);
        warnings.push(w.to_string());
    })?;
    let applied = history::get_all_records(client, schema, table).await?;

    let by_version: HashMap<&str, &ResolvedMigration> = discovered
        .iter()
        .filter(|m| m.kind != MigrationKind::Repeatable)
        .filter_map(|m| m.version.as_deref().map(|v| (v, m)))
        .collect();

    let mut issues = Vec::new();
    let mut validated_count = 0;

    for record in &applied {
        if record.is_schema_marker() {
            continue;
        }
        // Baseline command rows have no disk counterpart by construction.
        if record.migration_type == "BASELINE" {
            continue;
        }
        let Some(version) = record.version.as_deref() else {
            continue;
        };
        if !record.success {
            warnings.push(format!(
                "Failed migration recorded at rank {}: version {} ({}). Run repair to remove it.",
                record.installed_rank, version, record.script
            ));
            continue;
        }

        validated_count += 1;
        match by_version.get(version) {
            None => {
                issues.push(format!(
                    "Applied migration {} ({}) is missing from disk",
                    version, record.script
                ));
            }
            Some(migration) => match record.checksum {
                Some(expected) if expected != migration.checksum => {
                    issues.push(
                        CausewayError::ChecksumMismatch {
                            script: record.script.clone(),
                            expected,
                            found: migration.checksum,
                        }
                        .to_string(),
                    );
                }
                Some(_) => {}
                None => {
                    issues.push(format!(
                        "Applied migration {} ({}) has no recorded checksum",
                        version, record.script
                    ));
                }
            },
        }
    }

    Ok(ValidateReport {
        valid: issues.is_empty(),
        validated_count,
        issues,
        warnings,
    })
}
