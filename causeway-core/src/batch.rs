//! Split migration scripts into batches on the client-side `GO` separator.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::checksum::split_lines;

/// A line whose trimmed content is `GO`, optionally followed by a decimal
/// repeat count. Line-anchored: `GO` embedded in a larger statement
/// (`GOTO`, `SELECT 'GO'`) never separates. No string or comment awareness
/// is needed because separator status requires the line to contain only
/// `GO [N]`.
static GO_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*GO(?:\s+(\d+))?\s*$").unwrap());

/// A fragment of a script bounded by `GO` separators (or the script ends),
/// sent to the server as one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// The batch text, without the separating `GO` line.
    pub sql: String,
    /// Number of times the batch is executed (`GO N`).
    pub repeat_count: u32,
    /// 1-based line number of the first non-empty line, for diagnostics.
    pub start_line: usize,
}

/// Split a script into its ordered batches.
///
/// Lines accumulate into the current batch; a `GO` line terminates it.
/// Batches whose trimmed body is empty are discarded, so runs of
/// consecutive `GO` lines produce nothing. Content after the final `GO`
/// forms one more batch with a repeat count of 1.
pub fn split(script: &str) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut start_line = 0usize;

    for (idx, line) in split_lines(script).enumerate() {
        if let Some(caps) = GO_LINE_RE.captures(line) {
            let repeat_count = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .map(|n| n.max(1))
                .unwrap_or(1);
            push_batch(&mut batches, &mut current, start_line, repeat_count);
            start_line = 0;
            continue;
        }
        if start_line == 0 && !line.trim().is_empty() {
            start_line = idx + 1;
        }
        current.push(line);
    }
    push_batch(&mut batches, &mut current, start_line, 1);

    batches
}

fn push_batch(batches: &mut Vec<Batch>, current: &mut Vec<&str>, start_line: usize, repeat_count: u32) {
    let sql = current.join("\n");
    current.clear();
    if sql.trim().is_empty() {
        return;
    }
    batches.push(Batch {
        sql,
        repeat_count,
        start_line: start_line.max(1),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_go_with_repeat_count() {
        let batches = split("SELECT 1;\nGO\nSELECT 2;\nGO 3");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].sql, "SELECT 1;");
        assert_eq!(batches[0].repeat_count, 1);
        assert_eq!(batches[1].sql, "SELECT 2;");
        assert_eq!(batches[1].repeat_count, 3);
    }

    #[test]
    fn test_embedded_go_is_not_a_separator() {
        let batches = split("SELECT GOTO;\nGO");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].sql, "SELECT GOTO;");
    }

    #[test]
    fn test_consecutive_go_lines_produce_no_empty_batch() {
        let batches = split("SELECT 1;\nGO\nGO\nSELECT 2;");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].sql, "SELECT 1;");
        assert_eq!(batches[1].sql, "SELECT 2;");
    }

    #[test]
    fn test_go_is_case_insensitive_and_tolerates_whitespace() {
        let batches = split("SELECT 1;\n  go  \nSELECT 2;\n\tGo 2");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].repeat_count, 2);
    }

    #[test]
    fn test_trailing_content_forms_final_batch() {
        let batches = split("SELECT 1;\nGO\nSELECT 2;");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].sql, "SELECT 2;");
        assert_eq!(batches[1].repeat_count, 1);
    }

    #[test]
    fn test_start_line_points_at_first_non_empty_line() {
        let batches = split("\n\nSELECT 1;\nGO\n\nSELECT 2;");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].start_line, 3);
        assert_eq!(batches[1].start_line, 6);
    }

    #[test]
    fn test_go_inside_string_literal_on_its_own_line_still_separates() {
        // Deliberate: separator detection is line-anchored with no string
        // awareness; a line containing only GO splits even mid-literal.
        let batches = split("SELECT '\nGO\n';");
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_whitespace_only_script_yields_no_batches() {
        assert!(split("").is_empty());
        assert!(split("\n  \n\t\n").is_empty());
        assert!(split("GO\nGO 5\nGO").is_empty());
    }

    #[test]
    fn test_multi_line_batch_preserves_interior_lines() {
        let batches = split("CREATE TABLE t (\n  id INT\n);\nGO");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].sql, "CREATE TABLE t (\n  id INT\n);");
    }

    #[test]
    fn test_crlf_terminators() {
        let batches = split("SELECT 1;\r\nGO\r\nSELECT 2;\r\nGO 4\r\n");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].repeat_count, 4);
    }

    #[test]
    fn test_round_trip_reinserting_go_lines() {
        let original = split("SELECT 1;\nGO\nSELECT 2;\nGO 3");
        let rejoined = original
            .iter()
            .map(|b| b.sql.as_str())
            .collect::<Vec<_>>()
            .join("\nGO\n");
        let reparsed = split(&rejoined);
        let sqls: Vec<&str> = reparsed.iter().map(|b| b.sql.as_str()).collect();
        assert_eq!(sqls, vec!["SELECT 1;", "SELECT 2;"]);
    }
}
