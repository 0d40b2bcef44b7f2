//! Baseline an existing database at a specific version.

use crate::config::CausewayConfig;
use crate::db::{self, SqlClient};
use crate::error::{CausewayError, Result};
use crate::history;

/// Execute the baseline command.
///
/// 1. Ensure the history table exists
/// 2. Refuse if any migration rows exist (only the schema marker is permitted)
/// 3. Insert the schema marker if absent
/// 4. Insert a `BASELINE` row at the requested version
pub async fn execute(
    client: &mut SqlClient,
    config: &CausewayConfig,
    baseline_version: Option<&str>,
) -> Result<()> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;

    history::ensure_exists(client, schema, table).await?;

    db::acquire_app_lock(client, table, config.migrations.lock_timeout_ms).await?;
    let result = execute_inner(client, config, baseline_version).await;
    if let Err(e) = db::release_app_lock(client, table).await {
        log::warn!("Failed to release application lock: {}", e);
    }

    result
}

async fn execute_inner(
    client: &mut SqlClient,
    config: &CausewayConfig,
    baseline_version: Option<&str>,
) -> Result<()> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;
    let version = baseline_version.unwrap_or(&config.migrations.baseline_version);

    if history::has_migration_entries(client, schema, table).await? {
        return Err(CausewayError::BaselineExists);
    }

    let db_user = db::get_current_user(client)
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let installed_by = config
        .migrations
        .installed_by
        .as_deref()
        .unwrap_or(&db_user);

    history::insert_schema_marker(client, schema, table, installed_by).await?;
    let rank = history::next_rank(client, schema, table).await?;
    history::insert_baseline(client, schema, table, version, rank, installed_by).await?;

    log::info!(
        "Successfully baselined schema; version={}, schema={}",
        version,
        schema
    );
    Ok(())
}
