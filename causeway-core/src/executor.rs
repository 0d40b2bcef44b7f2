//! Execute pending migrations under one of the two transaction disciplines.
//!
//! Per-run: one transaction around the entire pending set, history rows
//! included, so a failure leaves the database byte-identical to its pre-run
//! state. Per-migration: a fresh transaction per migration; earlier
//! migrations stay committed and the failure is optionally recorded.

use std::time::Instant;

use serde::Serialize;

use crate::batch;
use crate::checksum::checksum;
use crate::config::{CausewayConfig, TransactionMode};
use crate::db::{self, SqlClient};
use crate::error::{format_db_error, CausewayError, Result};
use crate::history;
use crate::migration::{MigrationKind, ResolvedMigration};
use crate::placeholder::{build_placeholders, replace_placeholders, PlaceholderContext};
use crate::ProgressCallbacks;

/// Outcome of executing the pending set. Batch failures land here; only
/// transaction-control and driver errors propagate as `Err`.
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub migrations_applied: usize,
    pub total_time_ms: i64,
    pub details: Vec<AppliedDetail>,
    pub error_message: Option<String>,
    pub failed_script: Option<String>,
    pub failed_version: Option<String>,
}

impl ExecutionReport {
    fn empty() -> Self {
        Self {
            success: true,
            migrations_applied: 0,
            total_time_ms: 0,
            details: Vec::new(),
            error_message: None,
            failed_script: None,
            failed_version: None,
        }
    }
}

/// Details of a single applied migration within a run.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedDetail {
    pub version: Option<String>,
    pub description: String,
    pub script: String,
    pub execution_time_ms: i32,
}

/// Run the pending migrations in order under the configured discipline.
pub async fn run(
    client: &mut SqlClient,
    config: &CausewayConfig,
    pending: Vec<ResolvedMigration>,
    context: &PlaceholderContext,
    installed_by: &str,
    callbacks: &ProgressCallbacks,
) -> Result<ExecutionReport> {
    if pending.is_empty() {
        return Ok(ExecutionReport::empty());
    }
    match config.migrations.transaction_mode {
        TransactionMode::PerRun => {
            run_per_run(client, config, pending, context, installed_by, callbacks).await
        }
        TransactionMode::PerMigration => {
            run_per_migration(client, config, pending, context, installed_by, callbacks).await
        }
    }
}

async fn run_per_run(
    client: &mut SqlClient,
    config: &CausewayConfig,
    pending: Vec<ResolvedMigration>,
    context: &PlaceholderContext,
    installed_by: &str,
    callbacks: &ProgressCallbacks,
) -> Result<ExecutionReport> {
    let mut report = ExecutionReport::empty();
    let versions: Vec<(String, Option<String>)> = pending
        .iter()
        .map(|m| (m.script.clone(), m.version.clone()))
        .collect();

    db::begin_transaction(client).await?;
    match apply_all(client, config, pending, context, installed_by, callbacks, &mut report).await {
        Ok(()) => {
            db::commit_transaction(client)
                .await
                .map_err(|e| transaction_error("commit", &e))?;
            Ok(report)
        }
        Err(e) => {
            // Undo everything, history rows included.
            db::rollback_transaction(client)
                .await
                .map_err(|rollback_err| CausewayError::TransactionError {
                    operation: "rollback".to_string(),
                    reason: format!("{}; original failure: {}", rollback_err, e),
                })?;
            match e {
                CausewayError::MigrationFailed { script, reason } => {
                    log::error!("Rolled back run; failed_script={}", script);
                    Ok(ExecutionReport {
                        success: false,
                        migrations_applied: 0,
                        total_time_ms: 0,
                        details: Vec::new(),
                        error_message: Some(reason),
                        failed_version: versions
                            .iter()
                            .find(|(s, _)| *s == script)
                            .and_then(|(_, v)| v.clone()),
                        failed_script: Some(script),
                    })
                }
                other => Err(other),
            }
        }
    }
}

async fn apply_all(
    client: &mut SqlClient,
    config: &CausewayConfig,
    pending: Vec<ResolvedMigration>,
    context: &PlaceholderContext,
    installed_by: &str,
    callbacks: &ProgressCallbacks,
    report: &mut ExecutionReport,
) -> Result<()> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;
    let mut rank = history::next_rank(client, schema, table).await?;

    for mut migration in pending {
        callbacks.migration_start(&migration.script);
        let elapsed_ms = apply_one(client, config, &mut migration, context).await?;
        history::insert_applied_migration(
            client,
            schema,
            table,
            &migration,
            rank,
            elapsed_ms,
            installed_by,
        )
        .await?;
        rank += 1;

        callbacks.migration_applied(&migration.script, elapsed_ms);
        report.migrations_applied += 1;
        report.total_time_ms += elapsed_ms as i64;
        report.details.push(AppliedDetail {
            version: migration.version.clone(),
            description: migration.description.clone(),
            script: migration.script.clone(),
            execution_time_ms: elapsed_ms,
        });
    }
    Ok(())
}

async fn run_per_migration(
    client: &mut SqlClient,
    config: &CausewayConfig,
    pending: Vec<ResolvedMigration>,
    context: &PlaceholderContext,
    installed_by: &str,
    callbacks: &ProgressCallbacks,
) -> Result<ExecutionReport> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;
    let mut report = ExecutionReport::empty();

    for mut migration in pending {
        callbacks.migration_start(&migration.script);

        db::begin_transaction(client).await?;
        let outcome = apply_and_record(client, config, &mut migration, context, installed_by).await;
        match outcome {
            Ok(elapsed_ms) => {
                db::commit_transaction(client)
                    .await
                    .map_err(|e| transaction_error("commit", &e))?;

                callbacks.migration_applied(&migration.script, elapsed_ms);
                report.migrations_applied += 1;
                report.total_time_ms += elapsed_ms as i64;
                report.details.push(AppliedDetail {
                    version: migration.version.clone(),
                    description: migration.description.clone(),
                    script: migration.script.clone(),
                    execution_time_ms: elapsed_ms,
                });
            }
            Err(e) => {
                db::rollback_transaction(client)
                    .await
                    .map_err(|rollback_err| CausewayError::TransactionError {
                        operation: "rollback".to_string(),
                        reason: format!("{}; original failure: {}", rollback_err, e),
                    })?;

                let (script, reason) = match e {
                    CausewayError::MigrationFailed { script, reason } => (script, reason),
                    other => return Err(other),
                };

                // The failure row lives outside the rolled-back transaction.
                if config.migrations.record_failures {
                    let rank = history::next_rank(client, schema, table).await?;
                    if let Err(record_err) = history::insert_failed_migration(
                        client,
                        schema,
                        table,
                        &migration,
                        rank,
                        0,
                        installed_by,
                    )
                    .await
                    {
                        log::warn!(
                            "Failed to record migration failure in history table; script={}, error={}",
                            script,
                            record_err
                        );
                    }
                }

                log::error!("Migration failed; script={}, reason={}", script, reason);
                report.success = false;
                report.error_message = Some(reason);
                report.failed_version = migration.version.clone();
                report.failed_script = Some(script);
                return Ok(report);
            }
        }
    }

    Ok(report)
}

async fn apply_and_record(
    client: &mut SqlClient,
    config: &CausewayConfig,
    migration: &mut ResolvedMigration,
    context: &PlaceholderContext,
    installed_by: &str,
) -> Result<i32> {
    let schema = &config.migrations.default_schema;
    let table = &config.migrations.table;

    let elapsed_ms = apply_one(client, config, migration, context).await?;
    let rank = history::next_rank(client, schema, table).await?;
    history::insert_applied_migration(
        client,
        schema,
        table,
        migration,
        rank,
        elapsed_ms,
        installed_by,
    )
    .await?;
    Ok(elapsed_ms)
}

/// Substitute placeholders, split on `GO`, and execute every batch in order
/// against the current transaction. Returns the wall-clock time of the
/// batch executions in milliseconds.
async fn apply_one(
    client: &mut SqlClient,
    config: &CausewayConfig,
    migration: &mut ResolvedMigration,
    context: &PlaceholderContext,
) -> Result<i32> {
    log::info!("Applying migration; script={}", migration.script);

    let mut ctx = context.clone();
    ctx.filename = Some(migration.script.clone());
    let placeholders = build_placeholders(&config.placeholders, &ctx);
    let sql = replace_placeholders(&migration.sql, &placeholders);

    // A repeatable records the checksum of the substituted body, so scripts
    // with runtime-varying placeholders re-run on the next migrate.
    if migration.kind == MigrationKind::Repeatable {
        migration.checksum = checksum(&sql);
    }

    let batches = batch::split(&sql);
    let start = Instant::now();
    for b in &batches {
        for _ in 0..b.repeat_count {
            if let Err(e) = db::execute_batch(client, &b.sql, config.database.request_timeout_ms).await
            {
                let reason = match &e {
                    CausewayError::DatabaseError(db_err) => format_db_error(db_err),
                    other => other.to_string(),
                };
                return Err(CausewayError::MigrationFailed {
                    script: migration.script.clone(),
                    reason: format!(
                        "{}\n  Batch (line {}): {}",
                        reason,
                        b.start_line,
                        truncate_sql(&b.sql)
                    ),
                });
            }
        }
    }
    Ok(start.elapsed().as_millis() as i32)
}

fn transaction_error(operation: &str, e: &CausewayError) -> CausewayError {
    CausewayError::TransactionError {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

/// A bounded prefix of a failing batch, for error messages.
fn truncate_sql(sql: &str) -> String {
    const MAX_LEN: usize = 200;
    let trimmed = sql.trim();
    let mut end = trimmed.len().min(MAX_LEN);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    if end < trimmed.len() {
        format!("{}...", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}
