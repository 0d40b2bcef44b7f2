//! Diff discovered migrations against recorded history, classify each entry,
//! and produce the ordered pending set.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::history::HistoryRecord;
use crate::migration::{MigrationKind, ResolvedMigration};

/// Sentinel meaning "baseline version not explicitly set": an explicit match
/// is still attempted, but when none exists the highest-versioned baseline
/// on disk is auto-selected.
pub const BASELINE_VERSION_UNSET: &str = "1";

/// The reporting state of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationState {
    /// On disk, not yet applied (or visible but skipped when out of order).
    Pending,
    /// Recorded in history as successfully applied.
    Applied,
    /// Recorded in history as unsuccessful.
    Failed,
    /// Recorded in history but its file is missing from disk.
    Missing,
    /// Repeatable migration whose checksum has changed since last applied.
    Outdated,
    /// A baseline marker, or a baseline file that will never execute.
    Baseline,
    /// Versioned migration covered by a baseline.
    AboveBaseline,
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "Pending"),
            MigrationState::Applied => write!(f, "Applied"),
            MigrationState::Failed => write!(f, "Failed"),
            MigrationState::Missing => write!(f, "Missing"),
            MigrationState::Outdated => write!(f, "Outdated"),
            MigrationState::Baseline => write!(f, "Baseline"),
            MigrationState::AboveBaseline => write!(f, "Above Baseline"),
        }
    }
}

/// Combined view of a migration (file and/or history row) with its state.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: Option<String>,
    pub description: String,
    pub migration_type: String,
    pub script: String,
    pub state: MigrationState,
    pub checksum: Option<i32>,
    pub installed_on: Option<NaiveDateTime>,
    pub execution_time: Option<i32>,
}

/// Output of [`resolve`]: the pending execution list plus the status report.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Migrations to execute, in execution order: the selected baseline (if
    /// any), then versioned ascending, then repeatables in discovery order.
    pub pending: Vec<ResolvedMigration>,
    /// Union of disk and history entries with a classified state.
    pub report: Vec<MigrationStatus>,
    /// True when baseline-on-migrate applies to this database.
    pub should_baseline: bool,
    /// Version of the selected baseline, when one was selected.
    pub effective_baseline_version: Option<String>,
    /// True when the baseline was auto-selected (sentinel version).
    pub baseline_auto_selected: bool,
    /// Number of baseline files discovered on disk.
    pub baseline_file_count: usize,
}

/// Classify discovered migrations against applied history rows.
///
/// Version ordering is lexicographic on the version strings — timestamp
/// versions sort correctly this way. Out-of-order versioned migrations are
/// reported `Pending` but excluded from execution unless `out_of_order`.
pub fn resolve(
    discovered: &[ResolvedMigration],
    applied: &[HistoryRecord],
    baseline_version: &str,
    baseline_on_migrate: bool,
    out_of_order: bool,
) -> Resolution {
    let mut versioned: Vec<&ResolvedMigration> = discovered
        .iter()
        .filter(|m| m.kind == MigrationKind::Versioned)
        .collect();
    let mut baselines: Vec<&ResolvedMigration> = discovered
        .iter()
        .filter(|m| m.kind == MigrationKind::Baseline)
        .collect();
    let repeatables: Vec<&ResolvedMigration> = discovered
        .iter()
        .filter(|m| m.kind == MigrationKind::Repeatable)
        .collect();

    versioned.sort_by(|a, b| a.version.cmp(&b.version));
    baselines.sort_by(|a, b| a.version.cmp(&b.version));

    // Latest history row per version / per repeatable description wins.
    let mut applied_by_version: HashMap<&str, &HistoryRecord> = HashMap::new();
    let mut applied_repeatables: HashMap<&str, &HistoryRecord> = HashMap::new();
    for record in applied {
        if record.is_schema_marker() {
            continue;
        }
        match record.version.as_deref() {
            Some(version) => {
                applied_by_version.insert(version, record);
            }
            None if record.migration_type == "SQL" => {
                applied_repeatables.insert(record.description.as_str(), record);
            }
            None => {}
        }
    }

    let should_baseline = baseline_on_migrate
        && !applied
            .iter()
            .any(|r| matches!(r.migration_type.as_str(), "SQL" | "SQL_BASELINE" | "BASELINE"));

    // Baseline selection: an explicit version match is attempted first; the
    // sentinel falls back to auto-selecting the highest-versioned baseline.
    let mut selected_baseline: Option<&ResolvedMigration> = None;
    let mut baseline_auto_selected = false;
    if should_baseline && !baselines.is_empty() {
        if let Some(explicit) = baselines
            .iter()
            .find(|b| b.version.as_deref() == Some(baseline_version))
            .copied()
        {
            selected_baseline = Some(explicit);
        } else if baseline_version == BASELINE_VERSION_UNSET {
            selected_baseline = baselines.last().copied();
            baseline_auto_selected = true;
        }
    }
    let effective_baseline_version = selected_baseline.and_then(|b| b.version.clone());

    let highest_applied: Option<&str> = applied
        .iter()
        .filter(|r| !r.is_schema_marker())
        .filter_map(|r| r.version.as_deref())
        .max();

    let on_disk_versions: HashSet<&str> = versioned
        .iter()
        .chain(baselines.iter())
        .filter_map(|m| m.version.as_deref())
        .collect();

    let mut pending: Vec<ResolvedMigration> = Vec::new();
    let mut report: Vec<MigrationStatus> = Vec::new();
    let mut reported_versions: HashSet<&str> = HashSet::new();

    if let Some(baseline) = selected_baseline {
        pending.push(baseline.clone());
        report.push(status_from_file(baseline, MigrationState::Pending));
        if let Some(version) = baseline.version.as_deref() {
            reported_versions.insert(version);
        }
    }

    // Versioned migrations in ascending order.
    for migration in &versioned {
        let version = match migration.version.as_deref() {
            Some(v) => v,
            None => continue,
        };
        reported_versions.insert(version);

        if let Some(record) = applied_by_version.get(version) {
            let state = if record.success {
                MigrationState::Applied
            } else {
                MigrationState::Failed
            };
            report.push(status_from_record(record, state));
        } else if effective_baseline_version
            .as_deref()
            .is_some_and(|bv| version <= bv)
        {
            report.push(status_from_file(migration, MigrationState::AboveBaseline));
        } else if !out_of_order && highest_applied.is_some_and(|highest| version < highest) {
            // Visible but skipped: not added to the execution list.
            report.push(status_from_file(migration, MigrationState::Pending));
        } else {
            report.push(status_from_file(migration, MigrationState::Pending));
            pending.push((*migration).clone());
        }
    }

    // Baseline files that were not selected never execute.
    for baseline in &baselines {
        let version = match baseline.version.as_deref() {
            Some(v) => v,
            None => continue,
        };
        if reported_versions.contains(version) {
            continue;
        }
        reported_versions.insert(version);

        if let Some(record) = applied_by_version.get(version) {
            let state = if record.success {
                MigrationState::Applied
            } else {
                MigrationState::Failed
            };
            report.push(status_from_record(record, state));
        } else if effective_baseline_version
            .as_deref()
            .is_some_and(|bv| version <= bv)
        {
            report.push(status_from_file(baseline, MigrationState::AboveBaseline));
        } else {
            report.push(status_from_file(baseline, MigrationState::Baseline));
        }
    }

    // History rows with no disk counterpart.
    for record in applied {
        if record.is_schema_marker() {
            continue;
        }
        if let Some(version) = record.version.as_deref() {
            if reported_versions.contains(version) {
                continue;
            }
            reported_versions.insert(version);
            let state = if record.migration_type == "BASELINE" {
                // Marker inserted by the baseline command; no file expected.
                MigrationState::Baseline
            } else if !record.success {
                MigrationState::Failed
            } else {
                MigrationState::Missing
            };
            report.push(status_from_record(record, state));
        }
    }

    // Repeatables, keyed on description, in discovery order.
    let on_disk_descriptions: HashSet<&str> =
        repeatables.iter().map(|m| m.description.as_str()).collect();
    for migration in &repeatables {
        match applied_repeatables.get(migration.description.as_str()) {
            None => {
                report.push(status_from_file(migration, MigrationState::Pending));
                pending.push((*migration).clone());
            }
            Some(record) if record.checksum != Some(migration.checksum) => {
                report.push(status_from_record(record, MigrationState::Outdated));
                pending.push((*migration).clone());
            }
            Some(record) => {
                report.push(status_from_record(record, MigrationState::Applied));
            }
        }
    }
    for (description, record) in &applied_repeatables {
        if !on_disk_descriptions.contains(description) {
            report.push(status_from_record(record, MigrationState::Missing));
        }
    }

    // Versioned entries first by version, then repeatables by description.
    report.sort_by(|a, b| match (&a.version, &b.version) {
        (Some(av), Some(bv)) => av.cmp(bv),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.description.cmp(&b.description),
    });

    Resolution {
        pending,
        report,
        should_baseline,
        effective_baseline_version,
        baseline_auto_selected,
        baseline_file_count: baselines.len(),
    }
}

fn status_from_file(m: &ResolvedMigration, state: MigrationState) -> MigrationStatus {
    MigrationStatus {
        version: m.version.clone(),
        description: m.description.clone(),
        migration_type: m.kind.history_type().to_string(),
        script: m.script.clone(),
        state,
        checksum: Some(m.checksum),
        installed_on: None,
        execution_time: None,
    }
}

fn status_from_record(r: &HistoryRecord, state: MigrationState) -> MigrationStatus {
    MigrationStatus {
        version: r.version.clone(),
        description: r.description.clone(),
        migration_type: r.migration_type.clone(),
        script: r.script.clone(),
        state,
        checksum: r.checksum,
        installed_on: Some(r.installed_on),
        execution_time: Some(r.execution_time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(kind: MigrationKind, version: Option<&str>, description: &str) -> ResolvedMigration {
        let prefix = match kind {
            MigrationKind::Versioned => "V",
            MigrationKind::Baseline => "B",
            MigrationKind::Repeatable => "R",
        };
        let script = format!(
            "{}{}__{}.sql",
            prefix,
            version.unwrap_or_default(),
            description.replace(' ', "_")
        );
        ResolvedMigration {
            kind,
            version: version.map(str::to_string),
            description: description.to_string(),
            filename: script.clone(),
            path: PathBuf::from(&script),
            script,
            sql: "SELECT 1;".to_string(),
            checksum: 42,
        }
    }

    fn record(
        rank: i32,
        version: Option<&str>,
        description: &str,
        migration_type: &str,
        checksum: Option<i32>,
        success: bool,
    ) -> HistoryRecord {
        HistoryRecord {
            installed_rank: rank,
            version: version.map(str::to_string),
            description: description.to_string(),
            migration_type: migration_type.to_string(),
            script: format!("{}.sql", description.replace(' ', "_")),
            checksum,
            installed_by: "sa".to_string(),
            installed_on: chrono::DateTime::from_timestamp(0, 0).unwrap().naive_utc(),
            execution_time: 10,
            success,
        }
    }

    fn schema_marker() -> HistoryRecord {
        let mut r = record(0, None, "<< Flyway Schema Creation >>", "SCHEMA", None, true);
        r.checksum = None;
        r
    }

    fn state_of<'a>(resolution: &'a Resolution, script: &str) -> MigrationState {
        resolution
            .report
            .iter()
            .find(|s| s.script == script)
            .unwrap_or_else(|| panic!("no report entry for {}", script))
            .state
    }

    #[test]
    fn test_fresh_database_all_pending_in_order() {
        let discovered = vec![
            file(MigrationKind::Versioned, Some("2"), "Second"),
            file(MigrationKind::Repeatable, None, "Views"),
            file(MigrationKind::Versioned, Some("1"), "First"),
        ];
        let resolution = resolve(&discovered, &[schema_marker()], "1", false, false);

        let scripts: Vec<&str> = resolution.pending.iter().map(|m| m.script.as_str()).collect();
        assert_eq!(scripts, vec!["V1__First.sql", "V2__Second.sql", "R__Views.sql"]);
        assert!(!resolution.should_baseline);
    }

    #[test]
    fn test_applied_and_failed_classification() {
        let discovered = vec![
            file(MigrationKind::Versioned, Some("1"), "First"),
            file(MigrationKind::Versioned, Some("2"), "Second"),
        ];
        let applied = vec![
            schema_marker(),
            record(1, Some("1"), "First", "SQL", Some(42), true),
            record(2, Some("2"), "Second", "SQL", Some(42), false),
        ];
        let resolution = resolve(&discovered, &applied, "1", false, false);

        assert!(resolution.pending.is_empty());
        assert_eq!(state_of(&resolution, "First.sql"), MigrationState::Applied);
        assert_eq!(state_of(&resolution, "Second.sql"), MigrationState::Failed);
    }

    #[test]
    fn test_auto_baseline_selects_highest_and_covers_older_versions() {
        let discovered = vec![
            file(MigrationKind::Baseline, Some("20240101"), "v1"),
            file(MigrationKind::Baseline, Some("20250101"), "v2"),
            file(MigrationKind::Baseline, Some("20260122"), "v3"),
            file(MigrationKind::Versioned, Some("20240102"), "early"),
            file(MigrationKind::Versioned, Some("20260201"), "late"),
        ];
        let resolution = resolve(&discovered, &[], "1", true, false);

        assert!(resolution.should_baseline);
        assert!(resolution.baseline_auto_selected);
        assert_eq!(resolution.effective_baseline_version.as_deref(), Some("20260122"));
        assert_eq!(resolution.baseline_file_count, 3);

        let scripts: Vec<&str> = resolution.pending.iter().map(|m| m.script.as_str()).collect();
        assert_eq!(scripts, vec!["B20260122__v3.sql", "V20260201__late.sql"]);

        assert_eq!(
            state_of(&resolution, "V20240102__early.sql"),
            MigrationState::AboveBaseline
        );
        assert_eq!(
            state_of(&resolution, "B20260122__v3.sql"),
            MigrationState::Pending
        );
        assert_eq!(
            state_of(&resolution, "B20240101__v1.sql"),
            MigrationState::AboveBaseline
        );
    }

    #[test]
    fn test_explicit_baseline_version_match() {
        let discovered = vec![
            file(MigrationKind::Baseline, Some("20240101"), "v1"),
            file(MigrationKind::Baseline, Some("20250101"), "v2"),
        ];
        let resolution = resolve(&discovered, &[], "20240101", true, false);

        assert!(!resolution.baseline_auto_selected);
        assert_eq!(resolution.effective_baseline_version.as_deref(), Some("20240101"));
        assert_eq!(resolution.pending.len(), 1);
        assert_eq!(resolution.pending[0].script, "B20240101__v1.sql");
    }

    #[test]
    fn test_explicit_baseline_version_without_match_selects_none() {
        let discovered = vec![file(MigrationKind::Baseline, Some("20240101"), "v1")];
        let resolution = resolve(&discovered, &[], "99999999", true, false);

        assert!(resolution.effective_baseline_version.is_none());
        assert!(resolution.pending.is_empty());
    }

    #[test]
    fn test_sentinel_with_literal_baseline_one_matches_explicitly() {
        let discovered = vec![
            file(MigrationKind::Baseline, Some("1"), "one"),
            file(MigrationKind::Baseline, Some("20260101"), "ts"),
        ];
        let resolution = resolve(&discovered, &[], "1", true, false);

        // B1 exists, so the explicit-match branch wins over auto-select.
        assert!(!resolution.baseline_auto_selected);
        assert_eq!(resolution.effective_baseline_version.as_deref(), Some("1"));
    }

    #[test]
    fn test_no_baseline_when_history_has_migrations() {
        let discovered = vec![
            file(MigrationKind::Baseline, Some("5"), "base"),
            file(MigrationKind::Versioned, Some("6"), "next"),
        ];
        let applied = vec![record(1, Some("4"), "old", "SQL", Some(1), true)];
        let resolution = resolve(&discovered, &applied, "1", true, false);

        assert!(!resolution.should_baseline);
        let scripts: Vec<&str> = resolution.pending.iter().map(|m| m.script.as_str()).collect();
        assert_eq!(scripts, vec!["V6__next.sql"]);
    }

    #[test]
    fn test_out_of_order_skipped_but_reported_pending() {
        let discovered = vec![
            file(MigrationKind::Versioned, Some("1"), "late arrival"),
            file(MigrationKind::Versioned, Some("3"), "newest"),
        ];
        let applied = vec![record(1, Some("2"), "applied", "SQL", Some(1), true)];

        let strict = resolve(&discovered, &applied, "1", false, false);
        let scripts: Vec<&str> = strict.pending.iter().map(|m| m.script.as_str()).collect();
        assert_eq!(scripts, vec!["V3__newest.sql"]);
        assert_eq!(
            state_of(&strict, "V1__late_arrival.sql"),
            MigrationState::Pending
        );

        let relaxed = resolve(&discovered, &applied, "1", false, true);
        let scripts: Vec<&str> = relaxed.pending.iter().map(|m| m.script.as_str()).collect();
        assert_eq!(scripts, vec!["V1__late_arrival.sql", "V3__newest.sql"]);
    }

    #[test]
    fn test_missing_applied_migration_reported() {
        let applied = vec![
            schema_marker(),
            record(1, Some("1"), "gone", "SQL", Some(1), true),
        ];
        let resolution = resolve(&[], &applied, "1", false, false);

        assert_eq!(state_of(&resolution, "gone.sql"), MigrationState::Missing);
        assert!(resolution.pending.is_empty());
    }

    #[test]
    fn test_baseline_command_row_reported_as_baseline_not_missing() {
        let applied = vec![
            schema_marker(),
            record(1, Some("3"), "<< Flyway Baseline >>", "BASELINE", None, true),
        ];
        let resolution = resolve(&[], &applied, "1", false, false);
        assert_eq!(resolution.report.len(), 1);
        assert_eq!(resolution.report[0].state, MigrationState::Baseline);
    }

    #[test]
    fn test_repeatable_outdated_on_checksum_drift() {
        let mut repeatable = file(MigrationKind::Repeatable, None, "Views");
        repeatable.checksum = 100;
        let applied = vec![record(1, None, "Views", "SQL", Some(99), true)];
        let resolution = resolve(&[repeatable], &applied, "1", false, false);

        assert_eq!(resolution.pending.len(), 1);
        assert_eq!(resolution.report[0].state, MigrationState::Outdated);
    }

    #[test]
    fn test_repeatable_unchanged_not_pending() {
        let mut repeatable = file(MigrationKind::Repeatable, None, "Views");
        repeatable.checksum = 100;
        let applied = vec![record(1, None, "Views", "SQL", Some(100), true)];
        let resolution = resolve(&[repeatable], &applied, "1", false, false);

        assert!(resolution.pending.is_empty());
        assert_eq!(resolution.report[0].state, MigrationState::Applied);
    }

    #[test]
    fn test_repeatable_latest_row_wins() {
        let mut repeatable = file(MigrationKind::Repeatable, None, "Views");
        repeatable.checksum = 100;
        // Two prior runs; only the latest row reflects the live state.
        let applied = vec![
            record(1, None, "Views", "SQL", Some(50), true),
            record(2, None, "Views", "SQL", Some(100), true),
        ];
        let resolution = resolve(&[repeatable], &applied, "1", false, false);
        assert!(resolution.pending.is_empty());
    }

    #[test]
    fn test_repeatable_without_file_reported_missing() {
        let applied = vec![record(1, None, "Old View", "SQL", Some(1), true)];
        let resolution = resolve(&[], &applied, "1", false, false);
        assert_eq!(resolution.report[0].state, MigrationState::Missing);
    }

    #[test]
    fn test_schema_marker_excluded_from_report() {
        let resolution = resolve(&[], &[schema_marker()], "1", false, false);
        assert!(resolution.report.is_empty());
    }

    #[test]
    fn test_versions_sort_lexicographically() {
        let discovered = vec![
            file(MigrationKind::Versioned, Some("202601200000"), "b"),
            file(MigrationKind::Versioned, Some("202601120000"), "a"),
        ];
        let resolution = resolve(&discovered, &[], "1", false, false);
        let versions: Vec<&str> = resolution
            .pending
            .iter()
            .filter_map(|m| m.version.as_deref())
            .collect();
        assert_eq!(versions, vec!["202601120000", "202601200000"]);
    }
}
