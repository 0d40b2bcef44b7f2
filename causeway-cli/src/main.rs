//! CLI entry point for the causeway migration tool.
//! Provides clap-based command routing, exit code mapping based on error
//! type, and JSON/terminal output selection.

mod output;

use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;

use causeway_core::config::{normalize_location, CausewayConfig, CliOverrides};
use causeway_core::error::CausewayError;
use causeway_core::Causeway;

/// Print a report as JSON (when `--json` is active) or via a terminal formatter.
/// The 4-argument form accepts a `quiet` flag; when quiet and not JSON, output is suppressed.
macro_rules! print_report {
    ($report:expr, $json:expr, $printer:path) => {
        if $json {
            println!(
                "{}",
                serde_json::to_string_pretty(&$report).expect("JSON serialization failed")
            );
        } else {
            $printer(&$report);
        }
    };
    ($report:expr, $json:expr, $quiet:expr, $printer:path) => {
        if $json {
            println!(
                "{}",
                serde_json::to_string_pretty(&$report).expect("JSON serialization failed")
            );
        } else if !$quiet {
            $printer(&$report);
        }
    };
}

/// Top-level CLI definition with global flags and subcommand dispatch.
#[derive(Parser)]
#[command(
    name = "causeway",
    about = "Lightweight SQL Server migration tool",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// ADO.NET-style connection string (overrides config)
    #[arg(long, value_name = "CONNSTR")]
    url: Option<String>,

    /// Database server hostname (overrides config)
    #[arg(long, value_name = "HOST")]
    server: Option<String>,

    /// Database server port (default: 1433)
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Database name (overrides config)
    #[arg(long, value_name = "NAME")]
    database: Option<String>,

    /// SQL login (overrides config)
    #[arg(long, value_name = "USER")]
    user: Option<String>,

    /// Password (overrides config)
    #[arg(long, value_name = "PASSWORD")]
    password: Option<String>,

    /// Schema hosting the history table (overrides config)
    #[arg(long, value_name = "SCHEMA")]
    schema: Option<String>,

    /// History table name (overrides config)
    #[arg(long, value_name = "TABLE")]
    table: Option<String>,

    /// Migration locations, comma-separated (overrides config)
    #[arg(long, value_name = "PATHS")]
    locations: Option<String>,

    /// Number of retries when connecting to the database
    #[arg(long, value_name = "N")]
    connect_retries: Option<u32>,

    /// Per-batch request timeout in milliseconds (default: 300000)
    #[arg(long, value_name = "MS")]
    request_timeout: Option<u64>,

    /// Connection timeout in milliseconds (default: 30000)
    #[arg(long, value_name = "MS")]
    connection_timeout: Option<u64>,

    /// Allow out-of-order migrations
    #[arg(long, overrides_with = "no_out_of_order")]
    out_of_order: bool,

    /// Disallow out-of-order migrations (overrides --out-of-order)
    #[arg(long = "no-out-of-order", hide = true)]
    no_out_of_order: bool,

    /// Apply a baseline when migrating an empty database
    #[arg(long)]
    baseline_on_migrate: bool,

    /// Baseline version ("1" auto-selects the highest baseline on disk)
    #[arg(long, value_name = "VERSION")]
    baseline_version: Option<String>,

    /// Transaction mode: per-run, per-migration
    #[arg(long, value_name = "MODE")]
    transaction_mode: Option<String>,

    /// User placeholder as KEY=VALUE (repeatable)
    #[arg(long = "placeholder", value_name = "KEY=VALUE")]
    placeholders: Vec<String>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Report pending migrations without executing them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// All available causeway subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate,

    /// Show migration status
    Info,

    /// Validate applied migrations against local files
    Validate,

    /// Repair the schema history table
    Repair,

    /// Baseline an existing database
    Baseline {
        /// Version to baseline at
        #[arg(long = "version", value_name = "VER")]
        at_version: Option<String>,
    },

    /// Drop all objects in the managed schema
    Clean {
        /// Required flag to actually run clean
        #[arg(long)]
        allow_clean: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging (suppress when JSON output is requested)
    let filter = if cli.json {
        "error"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&e);
        process::exit(exit_code(&e));
    }
}

/// Map error types to differentiated exit codes.
fn exit_code(error: &CausewayError) -> i32 {
    match error {
        CausewayError::ConfigError(_) => 2,
        CausewayError::ValidationFailed(_) => 3,
        CausewayError::ChecksumMismatch { .. } => 3,
        CausewayError::BaselineExists => 3,
        CausewayError::DatabaseError(_) => 4,
        CausewayError::ConnectionError(_) => 4,
        CausewayError::RequestTimeout { .. } => 4,
        CausewayError::TransactionError { .. } => 4,
        CausewayError::MigrationFailed { .. } => 5,
        CausewayError::MigrationParseError(_) => 5,
        CausewayError::LockError(_) => 6,
        CausewayError::CleanDisabled => 7,
        CausewayError::HistoryError(_) => 1,
        CausewayError::IoError(_) => 1,
    }
}

/// Build configuration and dispatch the chosen subcommand.
async fn run(cli: Cli) -> Result<(), CausewayError> {
    let json_output = cli.json;
    let quiet = cli.quiet;

    // Build CLI overrides with negation flag support
    let out_of_order = if cli.out_of_order {
        Some(true)
    } else if cli.no_out_of_order {
        Some(false)
    } else {
        None
    };

    let mut placeholders = Vec::new();
    for entry in &cli.placeholders {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(CausewayError::ConfigError(format!(
                "Invalid --placeholder '{}'. Expected KEY=VALUE.",
                entry
            )));
        };
        placeholders.push((key.to_string(), value.to_string()));
    }

    let overrides = CliOverrides {
        url: cli.url,
        server: cli.server,
        port: cli.port,
        user: cli.user,
        password: cli.password,
        database: cli.database,
        default_schema: cli.schema,
        table: cli.table,
        locations: cli
            .locations
            .map(|l| l.split(',').map(|s| normalize_location(s.trim())).collect()),
        out_of_order,
        baseline_on_migrate: if cli.baseline_on_migrate {
            Some(true)
        } else {
            None
        },
        baseline_version: match &cli.command {
            Commands::Baseline { at_version } => at_version.clone().or(cli.baseline_version),
            _ => cli.baseline_version,
        },
        transaction_mode: cli.transaction_mode,
        dry_run: if cli.dry_run { Some(true) } else { None },
        connect_retries: cli.connect_retries,
        request_timeout_ms: cli.request_timeout,
        connection_timeout_ms: cli.connection_timeout,
        placeholders,
    };

    let config = CausewayConfig::load(cli.config.as_deref(), &overrides)?;
    let cw = Causeway::new(config).await?;

    match &cli.command {
        Commands::Migrate => {
            let report = cw.migrate().await?;
            print_report!(report, json_output, quiet, output::print_migrate_summary);
            if !report.success {
                return Err(CausewayError::MigrationFailed {
                    script: report.failed_script.unwrap_or_else(|| "unknown".to_string()),
                    reason: report
                        .error_message
                        .unwrap_or_else(|| "unknown failure".to_string()),
                });
            }
        }
        Commands::Info => {
            let statuses = cw.info().await?;
            print_report!(statuses, json_output, quiet, output::print_info_table);
        }
        Commands::Validate => {
            let report = cw.validate().await?;
            print_report!(report, json_output, quiet, output::print_validate_result);
            if !report.valid {
                return Err(CausewayError::ValidationFailed(report.issues.join("\n")));
            }
        }
        Commands::Repair => {
            let report = cw.repair().await?;
            print_report!(report, json_output, quiet, output::print_repair_result);
        }
        Commands::Baseline { at_version } => {
            cw.baseline(at_version.as_deref()).await?;
            if json_output {
                println!(
                    "{}",
                    serde_json::json!({"success": true, "message": "Successfully baselined schema."})
                );
            } else if !quiet {
                println!("{}", "Successfully baselined schema.".green().bold());
            }
        }
        Commands::Clean { allow_clean } => {
            let dropped = cw.clean(*allow_clean).await?;
            print_report!(dropped, json_output, quiet, output::print_clean_result);
        }
    }

    Ok(())
}

/// Print a formatted error message with actionable hints to stderr.
fn print_error(error: &CausewayError) {
    eprintln!("{} {}", "ERROR:".red().bold(), error);

    // Provide actionable guidance
    match error {
        CausewayError::ConfigError(_) => {
            eprintln!(
                "{}",
                "Hint: Check your causeway.toml or set CAUSEWAY_DATABASE_URL environment variable."
                    .dimmed()
            );
        }
        CausewayError::DatabaseError(_) | CausewayError::ConnectionError(_) => {
            eprintln!(
                "{}",
                "Hint: Verify the server is reachable and connection details are correct.".dimmed()
            );
        }
        CausewayError::RequestTimeout { .. } => {
            eprintln!(
                "{}",
                "Hint: Raise --request-timeout for long-running batches.".dimmed()
            );
        }
        CausewayError::CleanDisabled => {
            eprintln!(
                "{}",
                "Hint: Pass --allow-clean flag or set clean_enabled = true in causeway.toml."
                    .dimmed()
            );
        }
        CausewayError::ChecksumMismatch { .. } | CausewayError::ValidationFailed(_) => {
            eprintln!(
                "{}",
                "Hint: Run 'causeway repair' to update checksums, or restore the original migration file."
                    .dimmed()
            );
        }
        CausewayError::MigrationFailed { script, .. } => {
            eprintln!(
                "{}",
                format!(
                    "Hint: Fix the SQL error in '{}', then run 'causeway repair' if needed.",
                    script
                )
                .dimmed()
            );
        }
        CausewayError::MigrationParseError(_) => {
            eprintln!(
                "{}",
                "Hint: Check migration filenames follow the pattern V{version}__{description}.sql."
                    .dimmed()
            );
        }
        CausewayError::LockError(_) => {
            eprintln!(
                "{}",
                "Hint: Another migration may be running. Wait and retry, or check sys.dm_tran_locks."
                    .dimmed()
            );
        }
        CausewayError::BaselineExists => {
            eprintln!(
                "{}",
                "Hint: The history table already records migrations. Use 'causeway info' to see the current state."
                    .dimmed()
            );
        }
        CausewayError::TransactionError { .. } => {
            eprintln!(
                "{}",
                "Hint: Run 'causeway info' to check the current migration state.".dimmed()
            );
        }
        // Remaining errors with no specific guidance
        CausewayError::HistoryError(_) | CausewayError::IoError(_) => {}
    }
}
