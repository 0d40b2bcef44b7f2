//! Apply pending migrations to the database.

use chrono::Utc;
use serde::Serialize;

use crate::config::CausewayConfig;
use crate::db::{self, SqlClient};
use crate::error::Result;
use crate::executor::{self, AppliedDetail};
use crate::history;
use crate::migration::scan_migrations;
use crate::placeholder::PlaceholderContext;
use crate::resolver;
use crate::ProgressCallbacks;

/// Report returned after a migrate operation. Batch failures surface here
/// with `success = false`; only misconfiguration and unrecoverable driver
/// errors are returned as `Err`.
#[derive(Debug, Serialize)]
pub struct MigrateReport {
    /// Whether every pending migration was applied (vacuously true when
    /// nothing was pending).
    pub success: bool,
    /// True when pending work was reported without executing.
    pub dry_run: bool,
    /// Number of migrations applied in this run.
    pub migrations_applied: usize,
    /// Scripts that were pending at the start of the run, in execution order.
    pub pending: Vec<String>,
    /// Total execution time of all migrations in milliseconds.
    pub total_time_ms: i64,
    /// Per-migration details for each applied migration.
    pub details: Vec<AppliedDetail>,
    /// Scanner warnings (unparseable filenames, missing locations).
    pub warnings: Vec<String>,
    /// The failure, when `success` is false.
    pub error_message: Option<String>,
    /// Script path of the failing migration, when `success` is false.
    pub failed_script: Option<String>,
    /// Version of the failing migration, if it had one.
    pub failed_version: Option<String>,
}

/// Execute the migrate command.
pub async fn execute(
    client: &mut SqlClient,
    config: &CausewayConfig,
    callbacks: &ProgressCallbacks,
) -> Result<MigrateReport> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;

    history::ensure_exists(client, schema, table).await?;

    // The lock is held for the whole run and released on every path.
    db::acquire_app_lock(client, table, config.migrations.lock_timeout_ms).await?;
    let result = run_migrate(client, config, callbacks).await;
    if let Err(e) = db::release_app_lock(client, table).await {
        log::warn!("Failed to release application lock: {}", e);
    }

    match &result {
        Ok(report) => {
            log::info!(
                "Migrate completed; success={}, migrations_applied={}, total_time_ms={}",
                report.success,
                report.migrations_applied,
                report.total_time_ms
            );
        }
        Err(e) => {
            log::error!("Migrate failed: {}", e);
        }
    }

    result
}

async fn run_migrate(
    client: &mut SqlClient,
    config: &CausewayConfig,
    callbacks: &ProgressCallbacks,
) -> Result<MigrateReport> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;

    let db_user = db::get_current_user(client)
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let db_name = db::get_current_database(client)
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let installed_by = config
        .migrations
        .installed_by
        .as_deref()
        .unwrap_or(&db_user);

    history::insert_schema_marker(client, schema, table, installed_by).await?;

    let mut warnings: Vec<String> = Vec::new();
    let discovered = scan_migrations(&config.migrations.locations, |w| {
        log::warn!("{}", w);
        callbacks.warning(w);
        warnings.push(w.to_string());
    })?;

    let applied = history::get_all_records(client, schema, table).await?;

    let resolution = resolver::resolve(
        &discovered,
        &applied,
        &config.migrations.baseline_version,
        config.migrations.baseline_on_migrate,
        config.migrations.out_of_order,
    );
    if resolution.baseline_auto_selected {
        log::info!(
            "Auto-selected baseline; version={}, candidates={}",
            resolution.effective_baseline_version.as_deref().unwrap_or(""),
            resolution.baseline_file_count
        );
    }

    let pending_scripts: Vec<String> = resolution
        .pending
        .iter()
        .map(|m| m.script.clone())
        .collect();

    if config.migrations.dry_run {
        log::info!("Dry run; pending_count={}", pending_scripts.len());
        return Ok(MigrateReport {
            success: true,
            dry_run: true,
            migrations_applied: 0,
            pending: pending_scripts,
            total_time_ms: 0,
            details: Vec::new(),
            warnings,
            error_message: None,
            failed_script: None,
            failed_version: None,
        });
    }

    let context = PlaceholderContext {
        default_schema: Some(schema.clone()),
        database: Some(db_name),
        user: Some(db_user.clone()),
        table: Some(table.clone()),
        timestamp: Some(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        filename: None,
    };

    let execution = executor::run(
        client,
        config,
        resolution.pending,
        &context,
        installed_by,
        callbacks,
    )
    .await?;

    Ok(MigrateReport {
        success: execution.success,
        dry_run: false,
        migrations_applied: execution.migrations_applied,
        pending: pending_scripts,
        total_time_ms: execution.total_time_ms,
        details: execution.details,
        warnings,
        error_message: execution.error_message,
        failed_script: execution.failed_script,
        failed_version: execution.failed_version,
    })
}
