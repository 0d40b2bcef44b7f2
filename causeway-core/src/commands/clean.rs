//! Drop all objects in the managed schema.

use crate::config::CausewayConfig;
use crate::db::{quote_ident, SqlClient};
use crate::error::{CausewayError, Result};

/// Execute the clean command: drop every object in the default schema, in
/// dependency-safe order (foreign keys first, tables last among relations).
/// Returns the list of dropped objects.
pub async fn execute(
    client: &mut SqlClient,
    config: &CausewayConfig,
    allow_clean: bool,
) -> Result<Vec<String>> {
    if !allow_clean && !config.migrations.clean_enabled {
        return Err(CausewayError::CleanDisabled);
    }

    let schema = &config.migrations.default_schema;
    let mut dropped = Vec::new();

    // Foreign keys referencing or owned by the schema's tables.
    let fks = query_pairs(
        client,
        "SELECT fk.name, OBJECT_NAME(fk.parent_object_id) \
         FROM sys.foreign_keys fk \
         JOIN sys.schemas s ON fk.schema_id = s.schema_id \
         WHERE s.name = @P1",
        schema,
    )
    .await?;
    for (constraint, parent_table) in fks {
        let sql = format!(
            "ALTER TABLE {}.{} DROP CONSTRAINT {}",
            quote_ident(schema),
            quote_ident(&parent_table),
            quote_ident(&constraint)
        );
        client.simple_query(&sql).await?.into_results().await?;
        dropped.push(format!("FOREIGN KEY {}.{}", parent_table, constraint));
    }

    for (label, catalog_sql) in [
        (
            "VIEW",
            "SELECT v.name FROM sys.views v \
             JOIN sys.schemas s ON v.schema_id = s.schema_id WHERE s.name = @P1",
        ),
        (
            "TABLE",
            "SELECT t.name FROM sys.tables t \
             JOIN sys.schemas s ON t.schema_id = s.schema_id WHERE s.name = @P1",
        ),
        (
            "PROCEDURE",
            "SELECT p.name FROM sys.procedures p \
             JOIN sys.schemas s ON p.schema_id = s.schema_id WHERE s.name = @P1",
        ),
        (
            "FUNCTION",
            "SELECT o.name FROM sys.objects o \
             JOIN sys.schemas s ON o.schema_id = s.schema_id \
             WHERE s.name = @P1 AND o.type IN ('FN', 'IF', 'TF')",
        ),
        (
            "SEQUENCE",
            "SELECT sq.name FROM sys.sequences sq \
             JOIN sys.schemas s ON sq.schema_id = s.schema_id WHERE s.name = @P1",
        ),
    ] {
        let names = query_names(client, catalog_sql, schema).await?;
        for name in names {
            let sql = format!(
                "DROP {} {}.{}",
                label,
                quote_ident(schema),
                quote_ident(&name)
            );
            client.simple_query(&sql).await?.into_results().await?;
            dropped.push(format!("{} {}.{}", label, schema, name));
        }
    }

    log::info!("Clean completed; schema={}, dropped={}", schema, dropped.len());
    Ok(dropped)
}

async fn query_names(client: &mut SqlClient, sql: &str, schema: &str) -> Result<Vec<String>> {
    let rows = client
        .query(sql, &[&schema])
        .await?
        .into_first_result()
        .await?;
    Ok(rows
        .iter()
        .filter_map(|r| r.get::<&str, _>(0).map(str::to_string))
        .collect())
}

async fn query_pairs(
    client: &mut SqlClient,
    sql: &str,
    schema: &str,
) -> Result<Vec<(String, String)>> {
    let rows = client
        .query(sql, &[&schema])
        .await?
        .into_first_result()
        .await?;
    Ok(rows
        .iter()
        .filter_map(|r| {
            let first = r.get::<&str, _>(0)?.to_string();
            let second = r.get::<&str, _>(1)?.to_string();
            Some((first, second))
        })
        .collect())
}
