//! Repair the schema history table.
//!
//! Removes failed rows and realigns recorded checksums of versioned and
//! baseline migrations with the files on disk. Repeatable rows are left
//! alone: their recorded checksum is the post-substitution value and
//! re-running is the correcting mechanism.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::CausewayConfig;
use crate::db::SqlClient;
use crate::error::Result;
use crate::history;
use crate::migration::{scan_migrations, MigrationKind, ResolvedMigration};
use crate::ProgressCallbacks;

/// Report returned by the repair command.
#[derive(Debug, Serialize)]
pub struct RepairReport {
    /// Number of failed rows deleted.
    pub failed_removed: usize,
    /// Number of checksums rewritten to match disk.
    pub checksums_updated: usize,
    /// Human-readable description of each change.
    pub details: Vec<String>,
}

/// Execute the repair command.
pub async fn execute(
    client: &mut SqlClient,
    config: &CausewayConfig,
    callbacks: &ProgressCallbacks,
) -> Result<RepairReport> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;

    let mut report = RepairReport {
        failed_removed: 0,
        checksums_updated: 0,
        details: Vec::new(),
    };

    if !history::exists(client, schema, table).await? {
        return Ok(report);
    }

    let discovered = scan_migrations(&config.migrations.locations, |w| {
        log::warn!("{}", w);
        callbacks.warning(w);
    })?;
    let applied = history::get_all_records(client, schema, table).await?;

    let by_version: HashMap<&str, &ResolvedMigration> = discovered
        .iter()
        .filter(|m| m.kind != MigrationKind::Repeatable)
        .filter_map(|m| m.version.as_deref().map(|v| (v, m)))
        .collect();

    for record in &applied {
        if record.is_schema_marker() {
            continue;
        }

        if !record.success {
            history::delete_record(client, schema, table, record.installed_rank).await?;
            report.failed_removed += 1;
            report.details.push(format!(
                "Removed failed migration at rank {} ({})",
                record.installed_rank, record.script
            ));
            continue;
        }

        if record.migration_type == "BASELINE" {
            continue;
        }
        let Some(version) = record.version.as_deref() else {
            continue;
        };
        if let Some(migration) = by_version.get(version) {
            if record.checksum != Some(migration.checksum) {
                history::update_checksum(
                    client,
                    schema,
                    table,
                    record.installed_rank,
                    migration.checksum,
                )
                .await?;
                report.checksums_updated += 1;
                report.details.push(format!(
                    "Updated checksum for version {} ({}) to {}",
                    version, migration.script, migration.checksum
                ));
            }
        }
    }

    log::info!(
        "Repair completed; failed_removed={}, checksums_updated={}",
        report.failed_removed,
        report.checksums_updated
    );
    Ok(report)
}
