//! Migration file parsing, scanning, and checksum resolution.

use std::path::{Path, PathBuf};

use crate::checksum::checksum;
use crate::error::{CausewayError, Result};

/// The kind of migration, determined by the filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationKind {
    /// `V<version>__<description>.sql` — applied at most once.
    Versioned,
    /// `B<version>__<description>.sql` — subsumes versioned migrations at
    /// or below its version on a database with no prior migration history.
    Baseline,
    /// `R__<description>.sql` — re-applied whenever its checksum changes.
    Repeatable,
}

impl MigrationKind {
    /// The `type` value recorded in the history table.
    pub fn history_type(&self) -> &'static str {
        match self {
            MigrationKind::Versioned | MigrationKind::Repeatable => "SQL",
            MigrationKind::Baseline => "SQL_BASELINE",
        }
    }
}

/// Filename metadata for a migration, before its content is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub kind: MigrationKind,
    /// Version string; `None` exactly when the migration is repeatable.
    pub version: Option<String>,
    /// Human-readable description (underscores become spaces).
    pub description: String,
    /// Base filename, e.g. `V1__Init.sql`.
    pub filename: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the scanned location, normalized to forward slashes.
    /// Recorded verbatim in the history table's `script` column.
    pub script: String,
}

/// A migration file with its content and checksum resolved.
#[derive(Debug, Clone)]
pub struct ResolvedMigration {
    pub kind: MigrationKind,
    pub version: Option<String>,
    pub description: String,
    pub filename: String,
    pub path: PathBuf,
    pub script: String,
    /// UTF-8 script body as read from disk.
    pub sql: String,
    /// CRC32 over the raw content. For repeatables the executor recomputes
    /// this over the placeholder-substituted body just before recording.
    pub checksum: i32,
}

/// Parse a migration path into its filename metadata.
///
/// Recognized patterns (prefix letter case-insensitive):
/// `V<digits>__<desc>.sql`, `B<digits>__<desc>.sql`, `R__<desc>.sql`.
/// Only the leading digits after the prefix form the version; trailing
/// non-digit characters before the `__` separator stay in the description.
pub fn parse_migration_path(path: &Path, root: &Path) -> Result<MigrationFile> {
    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| invalid_name(&path.display().to_string()))?;

    let stem = match filename.len().checked_sub(4) {
        Some(split)
            if filename.is_char_boundary(split)
                && filename[split..].eq_ignore_ascii_case(".sql") =>
        {
            &filename[..split]
        }
        _ => return Err(invalid_name(filename)),
    };

    let mut chars = stem.chars();
    let prefix = chars.next().ok_or_else(|| invalid_name(filename))?;
    let rest = chars.as_str();

    let upper = prefix.to_ascii_uppercase();
    let (kind, version, raw_description) = match upper {
        'R' => {
            let desc = rest.strip_prefix("__").ok_or_else(|| invalid_name(filename))?;
            (MigrationKind::Repeatable, None, desc)
        }
        'V' | 'B' => {
            let digit_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            if digit_end == 0 {
                return Err(invalid_name(filename));
            }
            let version = &rest[..digit_end];
            let tail = &rest[digit_end..];
            if !tail.contains("__") {
                return Err(invalid_name(filename));
            }
            // Trailing non-digit characters before the separator stay in the
            // description, separating underscores included.
            let desc = tail.strip_prefix("__").unwrap_or(tail);
            let kind = if upper == 'B' {
                MigrationKind::Baseline
            } else {
                MigrationKind::Versioned
            };
            (kind, Some(version.to_string()), desc)
        }
        _ => return Err(invalid_name(filename)),
    };

    let description = raw_description.replace('_', " ").trim().to_string();
    if description.is_empty() {
        return Err(invalid_name(filename));
    }

    let relative = path.strip_prefix(root).unwrap_or(path);
    let script = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    Ok(MigrationFile {
        kind,
        version,
        description,
        filename: filename.to_string(),
        path: path.to_path_buf(),
        script,
    })
}

fn invalid_name(filename: &str) -> CausewayError {
    CausewayError::MigrationParseError(format!(
        "Invalid migration name '{}'. Expected V<version>__<description>.sql, \
         B<version>__<description>.sql, or R__<description>.sql",
        filename
    ))
}

/// Scan the given locations for `*.sql` files and resolve them into
/// migrations with content and checksum.
///
/// Missing locations and unparseable filenames are recoverable: both invoke
/// `on_warning` and are skipped. The returned ordering is not significant —
/// the resolver sorts.
pub fn scan_migrations<F>(locations: &[PathBuf], mut on_warning: F) -> Result<Vec<ResolvedMigration>>
where
    F: FnMut(&str),
{
    let mut resolved = Vec::new();

    for location in locations {
        if !location.is_dir() {
            on_warning(&format!(
                "Migration location not found, skipping: {}",
                location.display()
            ));
            continue;
        }

        let mut files = Vec::new();
        collect_sql_files(location, &mut files)?;
        files.sort();

        for path in files {
            let file = match parse_migration_path(&path, location) {
                Ok(file) => file,
                Err(e) => {
                    on_warning(&format!("Skipping file: {}", e));
                    continue;
                }
            };
            let sql = std::fs::read_to_string(&path)?;
            let checksum = checksum(&sql);
            resolved.push(ResolvedMigration {
                kind: file.kind,
                version: file.version,
                description: file.description,
                filename: file.filename,
                path: file.path,
                script: file.script,
                sql,
                checksum,
            });
        }
    }

    Ok(resolved)
}

fn collect_sql_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_sql_files(&path, out)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str) -> Result<MigrationFile> {
        parse_migration_path(Path::new("/migrations").join(name).as_path(), Path::new("/migrations"))
    }

    #[test]
    fn test_parse_versioned() {
        let file = parse("V202601200000__Add_Users.sql").unwrap();
        assert_eq!(file.kind, MigrationKind::Versioned);
        assert_eq!(file.version.as_deref(), Some("202601200000"));
        assert_eq!(file.description, "Add Users");
        assert_eq!(file.script, "V202601200000__Add_Users.sql");
    }

    #[test]
    fn test_parse_repeatable() {
        let file = parse("R__Refresh_Views.sql").unwrap();
        assert_eq!(file.kind, MigrationKind::Repeatable);
        assert_eq!(file.version, None);
        assert_eq!(file.description, "Refresh Views");
    }

    #[test]
    fn test_parse_baseline() {
        let file = parse("B202601122300__v3.0_Baseline.sql").unwrap();
        assert_eq!(file.kind, MigrationKind::Baseline);
        assert_eq!(file.version.as_deref(), Some("202601122300"));
        assert_eq!(file.description, "v3.0 Baseline");
    }

    #[test]
    fn test_parse_greedy_digits_stop_at_first_non_digit() {
        let file = parse("V202601200000__v3.1.x__Add.sql").unwrap();
        assert_eq!(file.version.as_deref(), Some("202601200000"));
        assert_eq!(file.description, "v3.1.x  Add");
    }

    #[test]
    fn test_single_underscore_is_invalid() {
        assert!(parse("V1_Init.sql").is_err());
    }

    #[test]
    fn test_prefix_is_case_insensitive() {
        assert_eq!(parse("v1__Init.sql").unwrap().kind, MigrationKind::Versioned);
        assert_eq!(parse("r__Views.sql").unwrap().kind, MigrationKind::Repeatable);
        assert_eq!(parse("b1__Base.sql").unwrap().kind, MigrationKind::Baseline);
    }

    #[test]
    fn test_unknown_prefix_is_invalid() {
        assert!(parse("U1__Undo.sql").is_err());
        assert!(parse("X__Thing.sql").is_err());
    }

    #[test]
    fn test_version_requires_digits() {
        assert!(parse("V__NoVersion.sql").is_err());
        assert!(parse("B__NoVersion.sql").is_err());
    }

    #[test]
    fn test_non_sql_extension_is_invalid() {
        assert!(parse("V1__Init.txt").is_err());
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert!(parse("V1__Init.SQL").is_ok());
    }

    #[test]
    fn test_script_path_uses_forward_slashes() {
        let root = Path::new("/migrations");
        let path = root.join("auth").join("V2__Add_Roles.sql");
        let file = parse_migration_path(&path, root).unwrap();
        assert_eq!(file.script, "auth/V2__Add_Roles.sql");
    }

    #[test]
    fn test_scan_resolves_and_warns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V1__Init.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("notes.sql"), "-- not a migration").unwrap();

        let mut warnings = Vec::new();
        let resolved = scan_migrations(&[dir.path().to_path_buf()], |w| {
            warnings.push(w.to_string())
        })
        .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].script, "V1__Init.sql");
        assert_eq!(resolved[0].sql, "SELECT 1;");
        assert_eq!(resolved[0].checksum, crate::checksum::checksum("SELECT 1;"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("notes.sql"));
    }

    #[test]
    fn test_scan_missing_location_warns_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V1__Init.sql"), "SELECT 1;").unwrap();

        let mut warnings = Vec::new();
        let resolved = scan_migrations(
            &[PathBuf::from("/does/not/exist"), dir.path().to_path_buf()],
            |w| warnings.push(w.to_string()),
        )
        .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("/does/not/exist"));
    }

    #[test]
    fn test_scan_recurses_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("auth")).unwrap();
        std::fs::write(dir.path().join("V1__Init.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("auth").join("V2__Roles.sql"), "SELECT 2;").unwrap();

        let resolved = scan_migrations(&[dir.path().to_path_buf()], |_| {}).unwrap();
        assert_eq!(resolved.len(), 2);
        let scripts: Vec<&str> = resolved.iter().map(|m| m.script.as_str()).collect();
        assert!(scripts.contains(&"V1__Init.sql"));
        assert!(scripts.contains(&"auth/V2__Roles.sql"));
    }
}
