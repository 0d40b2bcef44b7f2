//! Terminal output formatting for all causeway commands.
//! Uses comfy-table for tabular output and colored for
//! severity-aware terminal styling.

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use causeway_core::{MigrateReport, MigrationState, MigrationStatus, RepairReport, ValidateReport};

/// Format migration status as a colored table.
pub fn print_info_table(statuses: &[MigrationStatus]) {
    if statuses.is_empty() {
        println!("{}", "No migrations found.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Version"),
            Cell::new("Description"),
            Cell::new("Type"),
            Cell::new("State"),
            Cell::new("Installed On"),
            Cell::new("Execution Time"),
        ]);

    for status in statuses {
        let version = status.version.as_deref().unwrap_or("");
        let installed_on = status
            .installed_on
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let exec_time = status
            .execution_time
            .map(|t| format!("{}ms", t))
            .unwrap_or_default();

        table.add_row(vec![
            Cell::new(version),
            Cell::new(&status.description),
            Cell::new(&status.migration_type),
            Cell::new(format_state(&status.state)),
            Cell::new(&installed_on),
            Cell::new(&exec_time),
        ]);
    }

    println!("{table}");
}

/// Return a colored string representation of a migration state.
fn format_state(state: &MigrationState) -> String {
    match state {
        MigrationState::Pending => "Pending".yellow().to_string(),
        MigrationState::Applied => "Applied".green().to_string(),
        MigrationState::Failed => "Failed".red().bold().to_string(),
        MigrationState::Missing => "Missing".red().to_string(),
        MigrationState::Outdated => "Outdated".cyan().to_string(),
        MigrationState::Baseline => "Baseline".blue().to_string(),
        MigrationState::AboveBaseline => "Above Baseline".dimmed().to_string(),
    }
}

/// Print a migration report summary.
pub fn print_migrate_summary(report: &MigrateReport) {
    for warning in &report.warnings {
        println!("{} {}", "WARNING:".yellow().bold(), warning);
    }

    if report.dry_run {
        if report.pending.is_empty() {
            println!("{}", "Dry run: schema is up to date.".green());
            return;
        }
        println!(
            "{}",
            format!("Dry run: {} migration(s) would be applied", report.pending.len()).yellow()
        );
        for script in &report.pending {
            println!("  {} {}", "→".yellow(), script);
        }
        return;
    }

    if !report.success {
        println!(
            "{}",
            format!(
                "Migration failed at {}",
                report.failed_script.as_deref().unwrap_or("unknown")
            )
            .red()
            .bold()
        );
        if let Some(ref message) = report.error_message {
            println!("  {}", message);
        }
        return;
    }

    if report.migrations_applied == 0 {
        println!(
            "{}",
            "Schema is up to date. No migration necessary.".green()
        );
        return;
    }

    println!(
        "{}",
        format!(
            "Successfully applied {} migration(s) (execution time {}ms)",
            report.migrations_applied, report.total_time_ms
        )
        .green()
        .bold()
    );

    for detail in &report.details {
        let version = detail.version.as_deref().unwrap_or("(repeatable)");
        println!(
            "  {} {} — {} ({}ms)",
            "→".green(),
            version,
            detail.description,
            detail.execution_time_ms
        );
    }
}

/// Print a validate report.
pub fn print_validate_result(report: &ValidateReport) {
    if report.valid {
        println!(
            "{}",
            format!(
                "Successfully validated {} applied migration(s).",
                report.validated_count
            )
            .green()
            .bold()
        );
    }

    for warning in &report.warnings {
        println!("{} {}", "WARNING:".yellow().bold(), warning);
    }

    for issue in &report.issues {
        println!("{} {}", "ERROR:".red().bold(), issue);
    }
}

/// Print a repair report.
pub fn print_repair_result(report: &RepairReport) {
    if report.failed_removed == 0 && report.checksums_updated == 0 {
        println!("{}", "Repair complete. No changes needed.".green());
        return;
    }

    println!("{}", "Repair complete:".green().bold());
    for detail in &report.details {
        println!("  {} {}", "→".green(), detail);
    }
}

/// Print the list of objects dropped by clean.
pub fn print_clean_result(dropped: &Vec<String>) {
    if dropped.is_empty() {
        println!("{}", "Schema is already empty.".green());
        return;
    }

    println!(
        "{}",
        format!("Dropped {} object(s):", dropped.len()).green().bold()
    );
    for object in dropped {
        println!("  {} {}", "→".green(), object);
    }
}
