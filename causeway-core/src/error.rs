//! Error types for Causeway operations.

use thiserror::Error;

/// Extract the full error message from a tiberius error, including the
/// server token details that Display alone can hide.
pub fn format_db_error(e: &tiberius::error::Error) -> String {
    if let tiberius::error::Error::Server(token) = e {
        let mut msg = token.message().to_string();
        msg.push_str(&format!("\n  Code: {}", token.code()));
        if token.line() > 0 {
            msg.push_str(&format!("\n  Line: {}", token.line()));
        }
        if !token.procedure().is_empty() {
            msg.push_str(&format!("\n  Procedure: {}", token.procedure()));
        }
        return msg;
    }
    // Fallback: walk the source chain
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        msg.push_str(&format!(": {}", s));
        source = s.source();
    }
    msg
}

/// All error types that Causeway operations can produce.
#[derive(Error, Debug)]
pub enum CausewayError {
    /// Invalid or missing configuration (TOML parse errors, missing required fields, etc.).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A database query or connection operation failed.
    #[error("Database error: {}", format_db_error(.0))]
    DatabaseError(#[from] tiberius::error::Error),

    /// Could not establish a connection to the server.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A batch did not complete within the configured request timeout.
    #[error("Request timed out after {ms}ms")]
    RequestTimeout { ms: u64 },

    /// A migration filename could not be parsed into a valid migration.
    #[error("Migration parse error: {0}")]
    MigrationParseError(String),

    /// The on-disk checksum of a migration does not match the recorded checksum.
    #[error("Checksum mismatch for migration {script}: expected {expected}, found {found}")]
    ChecksumMismatch {
        script: String,
        expected: i32,
        found: i32,
    },

    /// One or more validation checks failed.
    #[error("Validation failed:\n{0}")]
    ValidationFailed(String),

    /// A migration script failed to execute against the database.
    #[error("Migration failed for {script}: {reason}")]
    MigrationFailed { script: String, reason: String },

    /// A transaction commit or rollback failed. The original failure, if any,
    /// is preserved in the reason.
    #[error("Transaction {operation} failed: {reason}")]
    TransactionError { operation: String, reason: String },

    /// Could not acquire the application lock used to prevent concurrent migrations.
    #[error("Failed to acquire application lock: {0}")]
    LockError(String),

    /// The `clean` command was invoked but clean is not enabled in the configuration.
    #[error(
        "Clean is disabled. Pass --allow-clean to enable it or set clean_enabled = true in config."
    )]
    CleanDisabled,

    /// A baseline was requested but the schema history table already records migrations.
    #[error("Baseline not allowed. The schema history table already contains applied migrations.")]
    BaselineExists,

    /// A history table row has an unexpected shape (missing required column, bad type).
    #[error("History table error: {0}")]
    HistoryError(String),

    /// A filesystem I/O operation failed (reading migration files, config, etc.).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, CausewayError>`.
pub type Result<T> = std::result::Result<T, CausewayError>;
