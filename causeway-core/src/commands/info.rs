//! Show migration status by merging resolved files with applied history.

use crate::config::CausewayConfig;
use crate::db::SqlClient;
use crate::error::Result;
use crate::history;
use crate::migration::scan_migrations;
use crate::resolver::{self, MigrationStatus};
use crate::ProgressCallbacks;

/// Execute the info command: classify every disk and history entry.
pub async fn execute(
    client: &mut SqlClient,
    config: &CausewayConfig,
    callbacks: &ProgressCallbacks,
) -> Result<Vec<MigrationStatus>> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;

    let applied = if history::exists(client, schema, table).await? {
        history::get_all_records(client, schema, table).await?
    } else {
        Vec::new()
    };

    let discovered = scan_migrations(&config.migrations.locations, |w| {
        log::warn!("{}", w);
        callbacks.warning(w);
    })?;

    let resolution = resolver::resolve(
        &discovered,
        &applied,
        &config.migrations.baseline_version,
        config.migrations.baseline_on_migrate,
        config.migrations.out_of_order,
    );

    Ok(resolution.report)
}
