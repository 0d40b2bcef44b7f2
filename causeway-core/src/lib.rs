//! Lightweight, Flyway-compatible SQL Server migration library.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use causeway_core::config::CausewayConfig;
//! use causeway_core::Causeway;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CausewayConfig::load(None, &Default::default())?;
//! let cw = Causeway::new(config).await?;
//! let report = cw.migrate().await?;
//! println!("Applied {} migrations", report.migrations_applied);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`config`] — Configuration loading (TOML, env vars, CLI overrides)
//! - [`migration`] — Migration file parsing and scanning
//! - [`checksum`] — CRC32 checksums (Flyway-compatible)
//! - [`batch`] — `GO` batch splitting
//! - [`placeholder`] — `${key}` replacement in SQL (only-known-keys)
//! - [`resolver`] — Disk × history classification and the pending set
//! - [`db`] — Connections, application locks, transactions
//! - [`history`] — Schema history table operations
//! - [`executor`] — Batch execution under both transaction disciplines
//! - [`commands`] — Individual command implementations
//! - [`error`] — Error types

pub mod batch;
pub mod checksum;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod history;
pub mod migration;
pub mod placeholder;
pub mod resolver;

use tokio::sync::Mutex;

use config::CausewayConfig;
use db::SqlClient;
use error::Result;

pub use commands::migrate::MigrateReport;
pub use commands::repair::RepairReport;
pub use commands::validate::ValidateReport;
pub use config::{CliOverrides, TransactionMode};
pub use executor::AppliedDetail;
pub use resolver::{MigrationState, MigrationStatus};

/// Optional progress callbacks invoked during a run. An empty record is a
/// no-op on every event.
#[derive(Default)]
pub struct ProgressCallbacks {
    /// Invoked with the script path before a migration executes.
    pub on_migration_start: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Invoked with the script path and execution time after a migration
    /// is recorded.
    pub on_migration_applied: Option<Box<dyn Fn(&str, i32) + Send + Sync>>,
    /// Invoked for recoverable warnings (scanner skips, missing locations).
    pub on_warning: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl ProgressCallbacks {
    pub(crate) fn migration_start(&self, script: &str) {
        if let Some(f) = &self.on_migration_start {
            f(script);
        }
    }

    pub(crate) fn migration_applied(&self, script: &str, execution_time_ms: i32) {
        if let Some(f) = &self.on_migration_applied {
            f(script, execution_time_ms);
        }
    }

    pub(crate) fn warning(&self, message: &str) {
        if let Some(f) = &self.on_warning {
            f(message);
        }
    }
}

impl std::fmt::Debug for ProgressCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCallbacks")
            .field("on_migration_start", &self.on_migration_start.is_some())
            .field("on_migration_applied", &self.on_migration_applied.is_some())
            .field("on_warning", &self.on_warning.is_some())
            .finish()
    }
}

/// Main entry point for the Causeway library.
///
/// Bundles the configuration, the run's exclusive database connection, and
/// the progress callbacks. Create one with a config and use its methods to
/// run migration commands programmatically.
pub struct Causeway {
    pub config: CausewayConfig,
    client: Mutex<SqlClient>,
    callbacks: ProgressCallbacks,
}

impl Causeway {
    /// Create a new Causeway instance, connecting to the database.
    ///
    /// If `connect_retries` is configured, retries with exponential backoff.
    pub async fn new(config: CausewayConfig) -> Result<Self> {
        let client = db::connect(&config.database).await?;
        Ok(Self {
            config,
            client: Mutex::new(client),
            callbacks: ProgressCallbacks::default(),
        })
    }

    /// Create a new Causeway instance with an existing connection.
    pub fn with_client(config: CausewayConfig, client: SqlClient) -> Self {
        Self {
            config,
            client: Mutex::new(client),
            callbacks: ProgressCallbacks::default(),
        }
    }

    /// Attach progress callbacks. Chainable.
    pub fn with_callbacks(mut self, callbacks: ProgressCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<MigrateReport> {
        let mut client = self.client.lock().await;
        commands::migrate::execute(&mut client, &self.config, &self.callbacks).await
    }

    /// Show migration status information.
    pub async fn info(&self) -> Result<Vec<MigrationStatus>> {
        let mut client = self.client.lock().await;
        commands::info::execute(&mut client, &self.config, &self.callbacks).await
    }

    /// Validate applied migrations against local files.
    pub async fn validate(&self) -> Result<ValidateReport> {
        let mut client = self.client.lock().await;
        commands::validate::execute(&mut client, &self.config, &self.callbacks).await
    }

    /// Baseline an existing database.
    pub async fn baseline(&self, version: Option<&str>) -> Result<()> {
        let mut client = self.client.lock().await;
        commands::baseline::execute(&mut client, &self.config, version).await
    }

    /// Repair the schema history table.
    pub async fn repair(&self) -> Result<RepairReport> {
        let mut client = self.client.lock().await;
        commands::repair::execute(&mut client, &self.config, &self.callbacks).await
    }

    /// Drop all objects in the managed schema.
    pub async fn clean(&self, allow_clean: bool) -> Result<Vec<String>> {
        let mut client = self.client.lock().await;
        commands::clean::execute(&mut client, &self.config, allow_clean).await
    }
}
