//! Configuration loading and resolution.
//!
//! Supports TOML config files, environment variables, and CLI overrides
//! with a defined priority order (CLI > env > TOML > defaults).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{CausewayError, Result};

/// Helper macro to apply an optional owned value directly to a target field.
macro_rules! apply_option {
    ($opt:expr => $target:expr) => {
        if let Some(v) = $opt {
            $target = v;
        }
    };
}

/// Helper macro to apply an optional owned value, wrapping it in `Some()`.
macro_rules! apply_option_some {
    ($opt:expr => $target:expr) => {
        if let Some(v) = $opt {
            $target = Some(v);
        }
    };
}

/// Helper macro to clone a borrowed optional value directly to a target field.
macro_rules! apply_option_clone {
    ($opt:expr => $target:expr) => {
        if let Some(ref v) = $opt {
            $target = v.clone();
        }
    };
}

/// Helper macro to clone a borrowed optional value, wrapping it in `Some()`.
macro_rules! apply_option_some_clone {
    ($opt:expr => $target:expr) => {
        if let Some(ref v) = $opt {
            $target = Some(v.clone());
        }
    };
}

/// Transaction discipline for a migrate run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionMode {
    /// One transaction around the entire pending set: the database ends up
    /// fully migrated or entirely unchanged.
    PerRun,
    /// A fresh transaction per migration; earlier migrations stay committed
    /// when a later one fails.
    #[default]
    PerMigration,
}

impl std::str::FromStr for TransactionMode {
    type Err = CausewayError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-run" | "per_run" => Ok(TransactionMode::PerRun),
            "per-migration" | "per_migration" => Ok(TransactionMode::PerMigration),
            _ => Err(CausewayError::ConfigError(format!(
                "Invalid transaction mode '{}'. Use 'per-run' or 'per-migration'.",
                s
            ))),
        }
    }
}

/// Top-level configuration for Causeway.
#[derive(Debug, Clone, Default)]
pub struct CausewayConfig {
    /// Database connection settings (server, credentials, timeouts, etc.).
    pub database: DatabaseConfig,
    /// Migration behavior settings (locations, table name, ordering, etc.).
    pub migrations: MigrationSettings,
    /// Key-value placeholder substitutions applied to migration SQL.
    pub placeholders: HashMap<String, String>,
}

/// Database connection configuration.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// ADO.NET-style connection string; takes precedence over the fields.
    pub url: Option<String>,
    /// Database server hostname.
    pub server: Option<String>,
    /// Database server port number (default 1433).
    pub port: Option<u16>,
    /// SQL login for authentication.
    pub user: Option<String>,
    /// Password for authentication.
    pub password: Option<String>,
    /// Database name to connect to.
    pub database: Option<String>,
    /// Whether to require TLS encryption (default true, for cloud compatibility).
    pub encrypt: bool,
    /// Whether to skip server certificate verification (default true).
    pub trust_server_certificate: bool,
    /// Per-batch request timeout in milliseconds (0 means no timeout).
    pub request_timeout_ms: u64,
    /// Connection timeout in milliseconds.
    pub connection_timeout_ms: u64,
    /// Number of times to retry a failed connection (max 20).
    pub connect_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            server: None,
            port: None,
            user: None,
            password: None,
            database: None,
            encrypt: true,
            trust_server_certificate: true,
            request_timeout_ms: 300_000,
            connection_timeout_ms: 30_000,
            connect_retries: 0,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("connect_retries", &self.connect_retries)
            .finish()
    }
}

/// Migration behavior settings.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Filesystem directories to scan for migration SQL files.
    pub locations: Vec<PathBuf>,
    /// Name of the schema history table.
    pub table: String,
    /// Schema hosting the history table; also the `${flyway:defaultSchema}`
    /// built-in value.
    pub default_schema: String,
    /// Whether to allow applying migrations with versions below the highest applied version.
    pub out_of_order: bool,
    /// Whether to apply a baseline when migrating an empty database.
    pub baseline_on_migrate: bool,
    /// Baseline version; `"1"` is the sentinel enabling auto-selection.
    pub baseline_version: String,
    /// Transaction discipline for migrate runs.
    pub transaction_mode: TransactionMode,
    /// Report pending migrations without executing them.
    pub dry_run: bool,
    /// Whether to insert a failed history row when a migration fails under
    /// per-migration mode.
    pub record_failures: bool,
    /// Whether the `clean` command is allowed to run.
    pub clean_enabled: bool,
    /// Custom value for the `installed_by` column (defaults to the login).
    pub installed_by: Option<String>,
    /// Application lock acquisition timeout in milliseconds.
    pub lock_timeout_ms: u64,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            locations: vec![PathBuf::from("db/migrations")],
            table: "flyway_schema_history".to_string(),
            default_schema: "dbo".to_string(),
            out_of_order: false,
            baseline_on_migrate: false,
            baseline_version: "1".to_string(),
            transaction_mode: TransactionMode::default(),
            dry_run: false,
            record_failures: true,
            clean_enabled: false,
            installed_by: None,
            lock_timeout_ms: 60_000,
        }
    }
}

// ── TOML deserialization structs ──

#[derive(Deserialize, Default)]
struct TomlConfig {
    database: Option<TomlDatabaseConfig>,
    migrations: Option<TomlMigrationSettings>,
    placeholders: Option<HashMap<String, String>>,
}

#[derive(Deserialize, Default)]
struct TomlDatabaseConfig {
    url: Option<String>,
    server: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    encrypt: Option<bool>,
    trust_server_certificate: Option<bool>,
    request_timeout_ms: Option<u64>,
    connection_timeout_ms: Option<u64>,
    connect_retries: Option<u32>,
}

#[derive(Deserialize, Default)]
struct TomlMigrationSettings {
    locations: Option<Vec<String>>,
    table: Option<String>,
    default_schema: Option<String>,
    out_of_order: Option<bool>,
    baseline_on_migrate: Option<bool>,
    baseline_version: Option<String>,
    transaction_mode: Option<String>,
    record_failures: Option<bool>,
    clean_enabled: Option<bool>,
    installed_by: Option<String>,
    lock_timeout_ms: Option<u64>,
}

/// CLI overrides that take highest priority.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override the ADO.NET-style connection string.
    pub url: Option<String>,
    /// Override the database server hostname.
    pub server: Option<String>,
    /// Override the database server port.
    pub port: Option<u16>,
    /// Override the SQL login.
    pub user: Option<String>,
    /// Override the password.
    pub password: Option<String>,
    /// Override the database name.
    pub database: Option<String>,
    /// Override the default schema.
    pub default_schema: Option<String>,
    /// Override the schema history table name.
    pub table: Option<String>,
    /// Override migration file locations.
    pub locations: Option<Vec<PathBuf>>,
    /// Override whether out-of-order migrations are allowed.
    pub out_of_order: Option<bool>,
    /// Override whether to baseline an empty database on migrate.
    pub baseline_on_migrate: Option<bool>,
    /// Override the baseline version string.
    pub baseline_version: Option<String>,
    /// Override the transaction mode.
    pub transaction_mode: Option<String>,
    /// Override dry-run mode.
    pub dry_run: Option<bool>,
    /// Override the number of connection retries.
    pub connect_retries: Option<u32>,
    /// Override the request timeout in milliseconds.
    pub request_timeout_ms: Option<u64>,
    /// Override the connection timeout in milliseconds.
    pub connection_timeout_ms: Option<u64>,
    /// Extra placeholder definitions (merged over config ones).
    pub placeholders: Vec<(String, String)>,
}

impl CausewayConfig {
    /// Load configuration with the following priority (highest wins):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. TOML config file
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>, overrides: &CliOverrides) -> Result<Self> {
        let mut config = CausewayConfig::default();

        // Layer 3: TOML config file
        let toml_path = config_path.unwrap_or("causeway.toml");
        if let Ok(content) = std::fs::read_to_string(toml_path) {
            // Warn if config file has overly permissive permissions (Unix only)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = std::fs::metadata(toml_path) {
                    let mode = meta.permissions().mode();
                    if mode & 0o077 != 0 {
                        log::warn!("Config file has overly permissive permissions. Consider chmod 600.; path={}, mode={:o}", toml_path, mode);
                    }
                }
            }
            let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
                CausewayError::ConfigError(format!(
                    "Failed to parse config file '{}': {}",
                    toml_path, e
                ))
            })?;
            config.apply_toml(toml_config);
        } else if config_path.is_some() {
            // If explicitly specified, error if not found
            return Err(CausewayError::ConfigError(format!(
                "Config file '{}' not found",
                toml_path
            )));
        }

        // Layer 2: Environment variables
        config.apply_env();

        // Layer 1: CLI overrides
        config.apply_cli(overrides);

        // Validate identifiers
        crate::db::validate_identifier(&config.migrations.default_schema)?;
        crate::db::validate_identifier(&config.migrations.table)?;

        // Cap connect_retries at 20
        if config.database.connect_retries > 20 {
            config.database.connect_retries = 20;
            log::warn!("connect_retries capped at 20");
        }

        Ok(config)
    }

    fn apply_toml(&mut self, toml: TomlConfig) {
        if let Some(db) = toml.database {
            apply_option_some!(db.url => self.database.url);
            apply_option_some!(db.server => self.database.server);
            apply_option_some!(db.port => self.database.port);
            apply_option_some!(db.user => self.database.user);
            apply_option_some!(db.password => self.database.password);
            apply_option_some!(db.database => self.database.database);
            apply_option!(db.encrypt => self.database.encrypt);
            apply_option!(db.trust_server_certificate => self.database.trust_server_certificate);
            apply_option!(db.request_timeout_ms => self.database.request_timeout_ms);
            apply_option!(db.connection_timeout_ms => self.database.connection_timeout_ms);
            apply_option!(db.connect_retries => self.database.connect_retries);
        }

        if let Some(m) = toml.migrations {
            if let Some(v) = m.locations {
                self.migrations.locations = v.into_iter().map(|s| normalize_location(&s)).collect();
            }
            apply_option!(m.table => self.migrations.table);
            apply_option!(m.default_schema => self.migrations.default_schema);
            apply_option!(m.out_of_order => self.migrations.out_of_order);
            apply_option!(m.baseline_on_migrate => self.migrations.baseline_on_migrate);
            apply_option!(m.baseline_version => self.migrations.baseline_version);
            if let Some(v) = m.transaction_mode {
                match v.parse() {
                    Ok(mode) => self.migrations.transaction_mode = mode,
                    Err(_) => log::warn!(
                        "Invalid transaction_mode '{}' in config, using default 'per-migration'. Valid values: per-run, per-migration",
                        v
                    ),
                }
            }
            apply_option!(m.record_failures => self.migrations.record_failures);
            apply_option!(m.clean_enabled => self.migrations.clean_enabled);
            apply_option_some!(m.installed_by => self.migrations.installed_by);
            apply_option!(m.lock_timeout_ms => self.migrations.lock_timeout_ms);
        }

        if let Some(p) = toml.placeholders {
            self.placeholders.extend(p);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CAUSEWAY_DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_DATABASE_SERVER") {
            self.database.server = Some(v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_DATABASE_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.database.port = Some(port);
            }
        }
        if let Ok(v) = std::env::var("CAUSEWAY_DATABASE_USER") {
            self.database.user = Some(v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_DATABASE_PASSWORD") {
            self.database.password = Some(v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_DATABASE_NAME") {
            self.database.database = Some(v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_CONNECT_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                self.database.connect_retries = n;
            }
        }
        if let Ok(v) = std::env::var("CAUSEWAY_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.database.request_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CAUSEWAY_CONNECTION_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.database.connection_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CAUSEWAY_MIGRATIONS_LOCATIONS") {
            self.migrations.locations =
                v.split(',').map(|s| normalize_location(s.trim())).collect();
        }
        if let Ok(v) = std::env::var("CAUSEWAY_MIGRATIONS_TABLE") {
            self.migrations.table = v;
        }
        if let Ok(v) = std::env::var("CAUSEWAY_DEFAULT_SCHEMA") {
            self.migrations.default_schema = v;
        }
        if let Ok(v) = std::env::var("CAUSEWAY_OUT_OF_ORDER") {
            self.migrations.out_of_order = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_BASELINE_ON_MIGRATE") {
            self.migrations.baseline_on_migrate = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_BASELINE_VERSION") {
            self.migrations.baseline_version = v;
        }
        if let Ok(v) = std::env::var("CAUSEWAY_TRANSACTION_MODE") {
            if let Ok(mode) = v.parse() {
                self.migrations.transaction_mode = mode;
            }
        }

        // Scan for placeholder env vars: CAUSEWAY_PLACEHOLDER_{KEY}
        for (key, value) in std::env::vars() {
            if let Some(placeholder_key) = key.strip_prefix("CAUSEWAY_PLACEHOLDER_") {
                self.placeholders
                    .insert(placeholder_key.to_lowercase(), value);
            }
        }
    }

    fn apply_cli(&mut self, overrides: &CliOverrides) {
        apply_option_some_clone!(overrides.url => self.database.url);
        apply_option_some_clone!(overrides.server => self.database.server);
        apply_option_some!(overrides.port => self.database.port);
        apply_option_some_clone!(overrides.user => self.database.user);
        apply_option_some_clone!(overrides.password => self.database.password);
        apply_option_some_clone!(overrides.database => self.database.database);
        apply_option_clone!(overrides.default_schema => self.migrations.default_schema);
        apply_option_clone!(overrides.table => self.migrations.table);
        apply_option_clone!(overrides.locations => self.migrations.locations);
        apply_option!(overrides.out_of_order => self.migrations.out_of_order);
        apply_option!(overrides.baseline_on_migrate => self.migrations.baseline_on_migrate);
        apply_option_clone!(overrides.baseline_version => self.migrations.baseline_version);
        if let Some(ref v) = overrides.transaction_mode {
            if let Ok(mode) = v.parse() {
                self.migrations.transaction_mode = mode;
            }
        }
        apply_option!(overrides.dry_run => self.migrations.dry_run);
        apply_option!(overrides.connect_retries => self.database.connect_retries);
        apply_option!(overrides.request_timeout_ms => self.database.request_timeout_ms);
        apply_option!(overrides.connection_timeout_ms => self.database.connection_timeout_ms);
        for (key, value) in &overrides.placeholders {
            self.placeholders.insert(key.clone(), value.clone());
        }
    }
}

fn parse_bool(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

/// Strip `filesystem:` prefix from a location path (Flyway compatibility).
pub fn normalize_location(location: &str) -> PathBuf {
    let stripped = location.strip_prefix("filesystem:").unwrap_or(location);
    PathBuf::from(stripped)
}
