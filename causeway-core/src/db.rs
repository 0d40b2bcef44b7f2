//! Database connection, application locking, and transaction execution for
//! SQL Server.

use std::time::Duration;

use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::DatabaseConfig;
use crate::error::{CausewayError, Result};

/// Connection type used throughout the crate. A run uses exactly one
/// connection so the active transaction spans every batch.
pub type SqlClient = Client<Compat<TcpStream>>;

/// Quote a SQL Server identifier as a bracketed name.
///
/// Doubles any embedded closing bracket and wraps in brackets.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Validate that a SQL identifier contains only safe characters.
///
/// Returns an error for names with characters outside `[a-zA-Z0-9_]`.
/// Even with quoting (defense in depth), we reject suspicious identifiers early.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CausewayError::ConfigError(
            "Identifier cannot be empty".to_string(),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CausewayError::ConfigError(format!(
            "Identifier '{}' contains invalid characters. Only [a-zA-Z0-9_] are allowed.",
            name
        )));
    }
    Ok(())
}

/// Build a tiberius config from the connection settings.
///
/// An ADO.NET-style `url` takes precedence; otherwise the config is built
/// from the individual fields.
fn build_config(db: &DatabaseConfig) -> Result<Config> {
    if let Some(ref ado) = db.url {
        return Config::from_ado_string(ado).map_err(CausewayError::DatabaseError);
    }

    let mut config = Config::new();
    config.host(db.server.as_deref().unwrap_or("localhost"));
    config.port(db.port.unwrap_or(1433));
    if let Some(ref database) = db.database {
        config.database(database);
    }
    let user = db
        .user
        .as_deref()
        .ok_or_else(|| CausewayError::ConfigError("Database user is required".to_string()))?;
    let password = db.password.as_deref().unwrap_or("");
    config.authentication(AuthMethod::sql_server(user, password));

    if db.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::NotSupported);
    }
    if db.trust_server_certificate {
        config.trust_cert();
    }

    Ok(config)
}

/// Check if an error is a permanent authentication failure that should not be retried.
fn is_permanent_error(e: &CausewayError) -> bool {
    if let CausewayError::DatabaseError(tiberius::error::Error::Server(token)) = e {
        // 18456 = login failed, 4060 = cannot open database
        return matches!(token.code(), 18456 | 4060);
    }
    false
}

async fn connect_once(db: &DatabaseConfig) -> Result<SqlClient> {
    let config = build_config(db)?;

    let connect_fut = async {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(CausewayError::DatabaseError)?;
        Ok::<_, CausewayError>(client)
    };

    if db.connection_timeout_ms > 0 {
        match tokio::time::timeout(Duration::from_millis(db.connection_timeout_ms), connect_fut)
            .await
        {
            Ok(result) => result,
            Err(_) => Err(CausewayError::ConnectionError(format!(
                "Connection attempt timed out after {}ms",
                db.connection_timeout_ms
            ))),
        }
    } else {
        connect_fut.await
    }
}

/// Connect to the database, retrying up to `connect_retries` times with
/// exponential backoff + jitter.
///
/// Each retry waits `min(2^attempt, 30)s + rand(0..1000ms)` before the next
/// attempt. Permanent errors (authentication failures) are not retried.
pub async fn connect(db: &DatabaseConfig) -> Result<SqlClient> {
    let mut last_err = None;

    for attempt in 0..=db.connect_retries {
        if attempt > 0 {
            let base_delay = std::cmp::min(1u64 << attempt, 30);
            let jitter_ms = fastrand::u64(0..1000);
            let delay = Duration::from_secs(base_delay) + Duration::from_millis(jitter_ms);
            log::info!(
                "Connection attempt failed, retrying; attempt={}, max_attempts={}, delay_ms={}",
                attempt + 1,
                db.connect_retries + 1,
                delay.as_millis() as u64
            );
            tokio::time::sleep(delay).await;
        }

        match connect_once(db).await {
            Ok(client) => {
                if attempt > 0 {
                    log::info!(
                        "Connected successfully after retry; attempt={}",
                        attempt + 1
                    );
                }
                return Ok(client);
            }
            Err(e) => {
                if is_permanent_error(&e) {
                    log::error!("Permanent connection error, not retrying: {}", e);
                    return Err(e);
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        CausewayError::ConnectionError("Connection failed with no attempts made".to_string())
    }))
}

/// Acquire an exclusive session-scoped application lock named after the
/// history table, preventing concurrent migration runs against the same
/// database. Acquired after the history table exists, released after the
/// run's transaction resolves.
pub async fn acquire_app_lock(client: &mut SqlClient, table: &str, timeout_ms: u64) -> Result<()> {
    let resource = lock_resource(table);
    log::info!("Acquiring application lock; resource={}", resource);

    let sql = format!(
        "DECLARE @result INT;\n\
         EXEC @result = sp_getapplock @Resource = N'{resource}', @LockMode = N'Exclusive', \
         @LockOwner = N'Session', @LockTimeout = {timeout};\n\
         SELECT @result;",
        resource = resource.replace('\'', "''"),
        timeout = timeout_ms,
    );

    let row = client
        .simple_query(&sql)
        .await
        .map_err(|e| CausewayError::LockError(e.to_string()))?
        .into_row()
        .await
        .map_err(|e| CausewayError::LockError(e.to_string()))?;

    // sp_getapplock returns >= 0 on success, < 0 on timeout/deadlock/error.
    let status = row.as_ref().and_then(|r| r.get::<i32, _>(0)).unwrap_or(-999);
    if status < 0 {
        return Err(CausewayError::LockError(format!(
            "sp_getapplock returned {} for resource '{}'. Another migration may be running.",
            status, resource
        )));
    }
    Ok(())
}

/// Release the application lock.
pub async fn release_app_lock(client: &mut SqlClient, table: &str) -> Result<()> {
    let resource = lock_resource(table);
    log::info!("Releasing application lock; resource={}", resource);

    let sql = format!(
        "EXEC sp_releaseapplock @Resource = N'{}', @LockOwner = N'Session';",
        resource.replace('\'', "''")
    );
    exec_simple(client, &sql)
        .await
        .map_err(|e| CausewayError::LockError(e.to_string()))
}

fn lock_resource(table: &str) -> String {
    format!("causeway:{}", table)
}

/// Get the current login name.
pub async fn get_current_user(client: &mut SqlClient) -> Result<String> {
    query_scalar_string(client, "SELECT SUSER_SNAME()").await
}

/// Get the current database name.
pub async fn get_current_database(client: &mut SqlClient) -> Result<String> {
    query_scalar_string(client, "SELECT DB_NAME()").await
}

async fn query_scalar_string(client: &mut SqlClient, sql: &str) -> Result<String> {
    let row = client.simple_query(sql).await?.into_row().await?;
    let value = row
        .as_ref()
        .and_then(|r| r.get::<&str, _>(0))
        .map(str::to_string);
    Ok(value.unwrap_or_else(|| "unknown".to_string()))
}

/// Open a transaction on this connection.
pub async fn begin_transaction(client: &mut SqlClient) -> Result<()> {
    exec_simple(client, "BEGIN TRAN").await
}

/// Commit the current transaction.
pub async fn commit_transaction(client: &mut SqlClient) -> Result<()> {
    exec_simple(client, "COMMIT TRAN").await
}

/// Roll back the current transaction.
pub async fn rollback_transaction(client: &mut SqlClient) -> Result<()> {
    exec_simple(client, "ROLLBACK TRAN").await
}

/// Execute one batch on the current connection, bounded by the request
/// timeout. Timeout expiry surfaces as a batch error.
pub async fn execute_batch(
    client: &mut SqlClient,
    sql: &str,
    request_timeout_ms: u64,
) -> Result<()> {
    let fut = exec_simple(client, sql);
    if request_timeout_ms > 0 {
        match tokio::time::timeout(Duration::from_millis(request_timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(CausewayError::RequestTimeout {
                ms: request_timeout_ms,
            }),
        }
    } else {
        fut.await
    }
}

/// Send a statement and drain every result set it produces.
async fn exec_simple(client: &mut SqlClient, sql: &str) -> Result<()> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}
