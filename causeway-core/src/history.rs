//! Schema history table operations (create, query, insert, update, delete).
//!
//! The table shape is a compatibility surface: column names, widths,
//! nullability, and index names are reproduced exactly, so an existing
//! Flyway-managed database is picked up as-is.

use chrono::NaiveDateTime;

use crate::db::{quote_ident, SqlClient};
use crate::error::{CausewayError, Result};
use crate::migration::ResolvedMigration;

/// Description and script of the rank-0 row marking schema creation.
pub const SCHEMA_MARKER_DESCRIPTION: &str = "<< Flyway Schema Creation >>";

/// Description and script recorded by the `baseline` command.
pub const BASELINE_DESCRIPTION: &str = "<< Flyway Baseline >>";

/// A row of the schema history table.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    /// Monotonically increasing rank indicating the order of installation.
    pub installed_rank: i32,
    /// Migration version string, or `None` for repeatable migrations and
    /// the schema marker.
    pub version: Option<String>,
    /// Human-readable description of the migration.
    pub description: String,
    /// Type of migration: `"SCHEMA"`, `"SQL"`, `"SQL_BASELINE"`, or `"BASELINE"`.
    pub migration_type: String,
    /// Script path of the migration, relative to its scan location.
    pub script: String,
    /// CRC32 checksum of the migration SQL, or `None` for markers.
    pub checksum: Option<i32>,
    /// Login or custom identifier that applied the migration.
    pub installed_by: String,
    /// Server-local timestamp when the row was inserted.
    pub installed_on: NaiveDateTime,
    /// Time in milliseconds the migration took to execute.
    pub execution_time: i32,
    /// Whether the migration completed successfully.
    pub success: bool,
}

impl HistoryRecord {
    /// True for the rank-0 marker row inserted when the table is created.
    pub fn is_schema_marker(&self) -> bool {
        self.migration_type == "SCHEMA"
    }
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Create the target schema and the history table if absent. Idempotent.
pub async fn ensure_exists(client: &mut SqlClient, schema: &str, table: &str) -> Result<()> {
    let create_schema = format!(
        "IF NOT EXISTS (SELECT 1 FROM sys.schemas WHERE name = N'{schema_lit}')\n    EXEC(N'CREATE SCHEMA {schema_q}')",
        schema_lit = escape_literal(schema),
        schema_q = escape_literal(&quote_ident(schema)),
    );
    client.simple_query(&create_schema).await?.into_results().await?;

    let fq = qualified(schema, table);
    let ddl = format!(
        r#"IF NOT EXISTS (
    SELECT 1 FROM sys.tables t
    JOIN sys.schemas s ON t.schema_id = s.schema_id
    WHERE s.name = N'{schema_lit}' AND t.name = N'{table_lit}'
)
BEGIN
    CREATE TABLE {fq} (
        [installed_rank] INT NOT NULL,
        [version] NVARCHAR(50) NULL,
        [description] NVARCHAR(200) NOT NULL,
        [type] NVARCHAR(20) NOT NULL,
        [script] NVARCHAR(1000) NOT NULL,
        [checksum] INT NULL,
        [installed_by] NVARCHAR(100) NOT NULL,
        [installed_on] DATETIME NOT NULL DEFAULT GETDATE(),
        [execution_time] INT NOT NULL,
        [success] BIT NOT NULL,
        CONSTRAINT {pk} PRIMARY KEY ([installed_rank])
    );
    CREATE INDEX {s_idx} ON {fq} ([success]);
END"#,
        schema_lit = escape_literal(schema),
        table_lit = escape_literal(table),
        fq = fq,
        pk = quote_ident(&format!("{}_pk", table)),
        s_idx = quote_ident(&format!("{}_s_idx", table)),
    );
    client.simple_query(&ddl).await?.into_results().await?;

    Ok(())
}

/// Check if the history table exists.
pub async fn exists(client: &mut SqlClient, schema: &str, table: &str) -> Result<bool> {
    let row = client
        .query(
            "SELECT COUNT(*) FROM sys.tables t \
             JOIN sys.schemas s ON t.schema_id = s.schema_id \
             WHERE s.name = @P1 AND t.name = @P2",
            &[&schema, &table],
        )
        .await?
        .into_row()
        .await?;

    let count = row.as_ref().and_then(|r| r.get::<i32, _>(0)).unwrap_or(0);
    Ok(count > 0)
}

/// Query all history rows, ordered by installed_rank.
pub async fn get_all_records(
    client: &mut SqlClient,
    schema: &str,
    table: &str,
) -> Result<Vec<HistoryRecord>> {
    let sql = format!(
        "SELECT [installed_rank], [version], [description], [type], [script], [checksum], \
         [installed_by], [installed_on], [execution_time], [success] \
         FROM {} ORDER BY [installed_rank]",
        qualified(schema, table)
    );

    let rows = client.simple_query(&sql).await?.into_first_result().await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        records.push(decode_record(row)?);
    }
    Ok(records)
}

/// Get the next installed_rank value: `max(installed_rank) + 1`, where an
/// empty table counts as max = -1 so the first real row gets rank 0.
pub async fn next_rank(client: &mut SqlClient, schema: &str, table: &str) -> Result<i32> {
    let sql = format!(
        "SELECT ISNULL(MAX([installed_rank]), -1) + 1 FROM {}",
        qualified(schema, table)
    );
    let row = client.simple_query(&sql).await?.into_row().await?;
    row.as_ref()
        .and_then(|r| r.get::<i32, _>(0))
        .ok_or_else(|| CausewayError::HistoryError("next rank query returned no value".to_string()))
}

/// Insert the rank-0 schema marker row. No-op if rank 0 already exists.
pub async fn insert_schema_marker(
    client: &mut SqlClient,
    schema: &str,
    table: &str,
    installed_by: &str,
) -> Result<()> {
    let fq = qualified(schema, table);
    let sql = format!(
        "IF NOT EXISTS (SELECT 1 FROM {fq} WHERE [installed_rank] = 0)\n\
         INSERT INTO {fq} \
         ([installed_rank], [version], [description], [type], [script], [checksum], [installed_by], [execution_time], [success]) \
         VALUES (0, NULL, @P1, N'SCHEMA', @P2, NULL, @P3, 0, 1)",
        fq = fq,
    );
    let script = format!("[{}]", schema);
    client
        .execute(&sql, &[&SCHEMA_MARKER_DESCRIPTION, &script.as_str(), &installed_by])
        .await?;
    Ok(())
}

/// Record a successfully applied migration at the given rank.
pub async fn insert_applied_migration(
    client: &mut SqlClient,
    schema: &str,
    table: &str,
    migration: &ResolvedMigration,
    rank: i32,
    execution_time_ms: i32,
    installed_by: &str,
) -> Result<()> {
    insert_row(
        client,
        schema,
        table,
        rank,
        migration.version.as_deref(),
        &migration.description,
        migration.kind.history_type(),
        &migration.script,
        Some(migration.checksum),
        installed_by,
        execution_time_ms,
        true,
    )
    .await
}

/// Record a failed migration at the given rank.
pub async fn insert_failed_migration(
    client: &mut SqlClient,
    schema: &str,
    table: &str,
    migration: &ResolvedMigration,
    rank: i32,
    execution_time_ms: i32,
    installed_by: &str,
) -> Result<()> {
    insert_row(
        client,
        schema,
        table,
        rank,
        migration.version.as_deref(),
        &migration.description,
        migration.kind.history_type(),
        &migration.script,
        Some(migration.checksum),
        installed_by,
        execution_time_ms,
        false,
    )
    .await
}

/// Insert a `BASELINE` marker row for the `baseline` command.
pub async fn insert_baseline(
    client: &mut SqlClient,
    schema: &str,
    table: &str,
    version: &str,
    rank: i32,
    installed_by: &str,
) -> Result<()> {
    insert_row(
        client,
        schema,
        table,
        rank,
        Some(version),
        BASELINE_DESCRIPTION,
        "BASELINE",
        BASELINE_DESCRIPTION,
        None,
        installed_by,
        0,
        true,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn insert_row(
    client: &mut SqlClient,
    schema: &str,
    table: &str,
    rank: i32,
    version: Option<&str>,
    description: &str,
    migration_type: &str,
    script: &str,
    checksum: Option<i32>,
    installed_by: &str,
    execution_time_ms: i32,
    success: bool,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} \
         ([installed_rank], [version], [description], [type], [script], [checksum], [installed_by], [execution_time], [success]) \
         VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7, @P8, @P9)",
        qualified(schema, table)
    );

    client
        .execute(
            &sql,
            &[
                &rank,
                &version,
                &description,
                &migration_type,
                &script,
                &checksum,
                &installed_by,
                &execution_time_ms,
                &success,
            ],
        )
        .await?;

    Ok(())
}

/// Rewrite the checksum of a specific row. Only used by `repair`.
pub async fn update_checksum(
    client: &mut SqlClient,
    schema: &str,
    table: &str,
    rank: i32,
    new_checksum: i32,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET [checksum] = @P1 WHERE [installed_rank] = @P2",
        qualified(schema, table)
    );
    client.execute(&sql, &[&new_checksum, &rank]).await?;
    Ok(())
}

/// Delete a specific row. Only used by `repair`.
pub async fn delete_record(
    client: &mut SqlClient,
    schema: &str,
    table: &str,
    rank: i32,
) -> Result<u64> {
    let sql = format!(
        "DELETE FROM {} WHERE [installed_rank] = @P1",
        qualified(schema, table)
    );
    let result = client.execute(&sql, &[&rank]).await?;
    Ok(result.total())
}

/// Check if any migration rows exist beyond the schema marker.
pub async fn has_migration_entries(
    client: &mut SqlClient,
    schema: &str,
    table: &str,
) -> Result<bool> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE [type] <> N'SCHEMA'",
        qualified(schema, table)
    );
    let row = client.simple_query(&sql).await?.into_row().await?;
    let count = row.as_ref().and_then(|r| r.get::<i32, _>(0)).unwrap_or(0);
    Ok(count > 0)
}

fn decode_record(row: &tiberius::Row) -> Result<HistoryRecord> {
    Ok(HistoryRecord {
        installed_rank: required(row.get::<i32, _>(0), "installed_rank")?,
        version: row.get::<&str, _>(1).map(str::to_string),
        description: required(row.get::<&str, _>(2), "description")?.to_string(),
        migration_type: required(row.get::<&str, _>(3), "type")?.to_string(),
        script: required(row.get::<&str, _>(4), "script")?.to_string(),
        checksum: row.get::<i32, _>(5),
        installed_by: required(row.get::<&str, _>(6), "installed_by")?.to_string(),
        installed_on: required(row.get::<NaiveDateTime, _>(7), "installed_on")?,
        execution_time: required(row.get::<i32, _>(8), "execution_time")?,
        success: required(row.get::<bool, _>(9), "success")?,
    })
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| {
        CausewayError::HistoryError(format!("history row is missing required column '{}'", column))
    })
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_is_bracketed() {
        assert_eq!(
            qualified("dbo", "flyway_schema_history"),
            "[dbo].[flyway_schema_history]"
        );
    }

    #[test]
    fn test_marker_constants_match_reference_tool() {
        assert_eq!(SCHEMA_MARKER_DESCRIPTION, "<< Flyway Schema Creation >>");
        assert_eq!(BASELINE_DESCRIPTION, "<< Flyway Baseline >>");
    }

    #[test]
    fn test_schema_marker_predicate() {
        let record = HistoryRecord {
            installed_rank: 0,
            version: None,
            description: SCHEMA_MARKER_DESCRIPTION.to_string(),
            migration_type: "SCHEMA".to_string(),
            script: "[dbo]".to_string(),
            checksum: None,
            installed_by: "sa".to_string(),
            installed_on: chrono::DateTime::from_timestamp(0, 0).unwrap().naive_utc(),
            execution_time: 0,
            success: true,
        };
        assert!(record.is_schema_marker());
    }
}
