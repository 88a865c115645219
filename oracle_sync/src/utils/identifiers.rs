//! Identifier utilities
//!
//! Oracle folds unquoted identifiers to upper case, so every comparison in
//! this crate goes through [`fold`]. Rendering quotes only what has to be
//! quoted.

use std::collections::HashMap;

/// Oracle reserved words that cannot appear unquoted as identifiers
const RESERVED_WORDS: &[&str] = &[
    "ACCESS", "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "AUDIT", "BETWEEN", "BY", "CHAR",
    "CHECK", "CLUSTER", "COLUMN", "COMMENT", "COMPRESS", "CONNECT", "CREATE", "CURRENT", "DATE",
    "DECIMAL", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "EXCLUSIVE", "EXISTS",
    "FILE", "FLOAT", "FOR", "FROM", "GRANT", "GROUP", "HAVING", "IDENTIFIED", "IMMEDIATE", "IN",
    "INCREMENT", "INDEX", "INITIAL", "INSERT", "INTEGER", "INTERSECT", "INTO", "IS", "LEVEL",
    "LIKE", "LOCK", "LONG", "MAXEXTENTS", "MINUS", "MLSLABEL", "MODE", "MODIFY", "NOAUDIT",
    "NOCOMPRESS", "NOT", "NOWAIT", "NULL", "NUMBER", "OF", "OFFLINE", "ON", "ONLINE", "OPTION",
    "OR", "ORDER", "PCTFREE", "PRIOR", "PUBLIC", "RAW", "RENAME", "RESOURCE", "REVOKE", "ROW",
    "ROWID", "ROWNUM", "ROWS", "SELECT", "SESSION", "SET", "SHARE", "SIZE", "SMALLINT", "START",
    "SUCCESSFUL", "SYNONYM", "SYSDATE", "TABLE", "THEN", "TO", "TRIGGER", "UID", "UNION",
    "UNIQUE", "UPDATE", "USER", "VALIDATE", "VALUES", "VARCHAR", "VARCHAR2", "VIEW", "WHENEVER",
    "WHERE", "WITH",
];

/// Maximum identifier length since Oracle 12.2
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Comparison key for an identifier
pub fn fold(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Case-insensitive identifier equality
pub fn same(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}

/// Whether `name` is a valid unquoted Oracle identifier
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LENGTH
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))
}

/// Check if a name is an Oracle reserved word
pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.contains(&fold(name).as_str())
}

/// Render an identifier for generated SQL
pub fn quote(name: &str) -> String {
    if is_plain_identifier(name) && !is_reserved_word(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Render an optionally owner-qualified name
pub fn qualify(owner: Option<&str>, name: &str) -> String {
    match owner {
        Some(owner) if !owner.is_empty() => format!("{}.{}", quote(owner), quote(name)),
        _ => quote(name),
    }
}

/// Quote a string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Whether an identifier is safe to splice into SQL text
///
/// Letters, digits, underscore and at most one dot (`OWNER.TABLE`).
pub fn is_safe_identifier(id: &str) -> bool {
    if id.is_empty() || id.len() > 2 * MAX_IDENTIFIER_LENGTH + 1 {
        return false;
    }
    let mut dot_count = 0;
    for ch in id.chars() {
        match ch {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '$' | '#' => {}
            '.' => {
                dot_count += 1;
                if dot_count > 1 {
                    return false;
                }
            }
            _ => return false,
        }
    }
    !id.starts_with('.') && !id.ends_with('.')
}

/// Validate and fold an identifier taken from user input
pub fn normalize_identifier(id: &str) -> Option<String> {
    let trimmed = id.trim();
    if is_safe_identifier(trimmed) {
        Some(trimmed.to_uppercase())
    } else {
        None
    }
}

/// Reject free-form WHERE clauses carrying statement separators, comments or
/// data/definition keywords
pub fn is_suspicious_where_clause(where_clause: &str) -> bool {
    let lc = format!(" {} ", where_clause.to_lowercase());
    let blocked = [
        ";", "--", "/*", "*/", " alter ", " drop ", " truncate ", " insert ", " update ",
        " delete ", " merge ", " grant ", " revoke ", " create ", " execute ", " call ",
    ];
    blocked.iter().any(|b| lc.contains(b))
}

/// Find two names that collide once folded
pub fn find_case_conflict<'a, I>(names: I) -> Option<(String, String)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashMap::<String, &str>::new();

    for name in names {
        let key = fold(name);
        if let Some(existing) = seen.get(&key) {
            return Some((existing.to_string(), name.to_string()));
        }
        seen.insert(key, name);
    }

    None
}
