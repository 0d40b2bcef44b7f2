//! Placeholder replacement in SQL (`${key}` syntax, only-known-keys).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex_lite::Regex;

/// Compiled regex for matching `${key}` placeholders. The key is any
/// non-empty run of characters excluding `}`.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Values backing the `flyway:*` built-in placeholders.
///
/// A field left at `None` leaves its built-in unregistered, so occurrences
/// in scripts pass through untouched.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderContext {
    /// Value of `${flyway:defaultSchema}`.
    pub default_schema: Option<String>,
    /// Value of `${flyway:database}`.
    pub database: Option<String>,
    /// Value of `${flyway:user}`.
    pub user: Option<String>,
    /// Value of `${flyway:filename}` — the script path of the migration
    /// being executed; set per migration by the executor.
    pub filename: Option<String>,
    /// Value of `${flyway:table}` — the history table name.
    pub table: Option<String>,
    /// Value of `${flyway:timestamp}` — stamped once per run.
    pub timestamp: Option<String>,
}

/// Build the full placeholder map: built-ins first, then user keys, so a
/// user key shadows a built-in of the same name. Keys are stored lowercase
/// for case-insensitive lookup.
pub fn build_placeholders(
    user_placeholders: &HashMap<String, String>,
    context: &PlaceholderContext,
) -> HashMap<String, String> {
    let mut map = HashMap::new();

    let builtins = [
        ("flyway:defaultschema", &context.default_schema),
        ("flyway:database", &context.database),
        ("flyway:user", &context.user),
        ("flyway:filename", &context.filename),
        ("flyway:table", &context.table),
        ("flyway:timestamp", &context.timestamp),
    ];
    for (key, value) in builtins {
        if let Some(v) = value {
            map.insert(key.to_string(), v.clone());
        }
    }

    for (key, value) in user_placeholders {
        map.insert(key.to_lowercase(), value.clone());
    }

    map
}

/// Replace recognized `${key}` placeholders in the given SQL string.
///
/// Lookup is case-insensitive. Unrecognized placeholders are copied through
/// verbatim — this is the deliberate departure from Flyway, which errors on
/// unknown keys. The substitution is a single left-to-right pass and the
/// replacement text is inserted literally, never re-expanded.
pub fn replace_placeholders(sql: &str, placeholders: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut last_end = 0;

    for caps in PLACEHOLDER_RE.captures_iter(sql) {
        let full_match = caps.get(0).unwrap();
        let key = caps.get(1).unwrap().as_str().to_lowercase();

        if let Some(value) = placeholders.get(&key) {
            result.push_str(&sql[last_end..full_match.start()]);
            result.push_str(value);
            last_end = full_match.end();
        }
        // Unknown key: leave the region untouched for the verbatim copy below.
    }

    result.push_str(&sql[last_end..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PlaceholderContext {
        PlaceholderContext {
            default_schema: Some("__mj".to_string()),
            timestamp: Some("2026-01-30T00:00:00Z".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_known_builtin_replaced_unknown_preserved() {
        let map = build_placeholders(&HashMap::new(), &context());
        let sql = "CREATE TABLE [${flyway:defaultSchema}].[T] -- ${unknown}";
        let result = replace_placeholders(sql, &map);
        assert_eq!(result, "CREATE TABLE [__mj].[T] -- ${unknown}");
    }

    #[test]
    fn test_unset_builtin_passes_through() {
        // No filename in context, so ${flyway:filename} is not registered.
        let map = build_placeholders(&HashMap::new(), &context());
        let sql = "PRINT '${flyway:filename}';";
        assert_eq!(replace_placeholders(sql, &map), sql);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let map = build_placeholders(&HashMap::new(), &context());
        let result = replace_placeholders("USE [${FLYWAY:DEFAULTSCHEMA}];", &map);
        assert_eq!(result, "USE [__mj];");
    }

    #[test]
    fn test_user_key_shadows_builtin() {
        let mut user = HashMap::new();
        user.insert("flyway:defaultSchema".to_string(), "override".to_string());
        let map = build_placeholders(&user, &context());
        let result = replace_placeholders("USE [${flyway:defaultSchema}];", &map);
        assert_eq!(result, "USE [override];");
    }

    #[test]
    fn test_user_placeholder_replaced() {
        let mut user = HashMap::new();
        user.insert("env".to_string(), "production".to_string());
        let map = build_placeholders(&user, &PlaceholderContext::default());
        let result = replace_placeholders("PRINT '${env}';", &map);
        assert_eq!(result, "PRINT 'production';");
    }

    #[test]
    fn test_no_matching_keys_leaves_input_unchanged() {
        let map = build_placeholders(&HashMap::new(), &PlaceholderContext::default());
        let sql = "SELECT '${a}', '${b}' FROM ${c};";
        assert_eq!(replace_placeholders(sql, &map), sql);
    }

    #[test]
    fn test_replacement_is_not_re_expanded() {
        let mut user = HashMap::new();
        user.insert("a".to_string(), "${b}".to_string());
        user.insert("b".to_string(), "nested".to_string());
        let map = build_placeholders(&user, &PlaceholderContext::default());
        // ${a} expands to the literal ${b}; the pass does not revisit it.
        assert_eq!(replace_placeholders("x ${a} y", &map), "x ${b} y");
    }

    #[test]
    fn test_multiple_occurrences_replaced() {
        let mut user = HashMap::new();
        user.insert("t".to_string(), "users".to_string());
        let map = build_placeholders(&user, &PlaceholderContext::default());
        let result = replace_placeholders("SELECT * FROM ${t} WHERE ${t}.id = 1;", &map);
        assert_eq!(result, "SELECT * FROM users WHERE users.id = 1;");
    }

    #[test]
    fn test_match_is_non_greedy_over_closing_brace() {
        let mut user = HashMap::new();
        user.insert("a".to_string(), "X".to_string());
        let map = build_placeholders(&user, &PlaceholderContext::default());
        // The first } closes the placeholder; the rest is literal.
        assert_eq!(replace_placeholders("${a}}", &map), "X}");
    }

    #[test]
    fn test_empty_name_is_not_a_placeholder() {
        let map = build_placeholders(&HashMap::new(), &PlaceholderContext::default());
        assert_eq!(replace_placeholders("${}", &map), "${}");
    }

    #[test]
    fn test_build_placeholders_registers_set_builtins() {
        let ctx = PlaceholderContext {
            default_schema: Some("dbo".to_string()),
            database: Some("app".to_string()),
            user: Some("sa".to_string()),
            filename: Some("V1__init.sql".to_string()),
            table: Some("flyway_schema_history".to_string()),
            timestamp: Some("2026-02-01T00:00:00Z".to_string()),
        };
        let map = build_placeholders(&HashMap::new(), &ctx);
        assert_eq!(map.get("flyway:defaultschema").unwrap(), "dbo");
        assert_eq!(map.get("flyway:database").unwrap(), "app");
        assert_eq!(map.get("flyway:user").unwrap(), "sa");
        assert_eq!(map.get("flyway:filename").unwrap(), "V1__init.sql");
        assert_eq!(map.get("flyway:table").unwrap(), "flyway_schema_history");
        assert_eq!(map.get("flyway:timestamp").unwrap(), "2026-02-01T00:00:00Z");
    }
}
