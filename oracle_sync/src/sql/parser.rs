//! Heuristic SQL statement classifier
//!
//! Purely lexical: comments and string literals are removed, the remaining
//! text is upper-cased, and a handful of patterns pick out the statement
//! kind, the tables and the columns it names.
//!
//! What it does not understand it reports as unknown rather than guessing:
//!
//! - statements starting with `WITH` (common table expressions) come back as
//!   [`StatementType::Unknown`] with no facts;
//! - statements containing a subquery or a quoted identifier keep their kind
//!   and clause flags but report no tables or columns;
//! - q-quoted literals (`q'[...]'`) are not recognised.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Statement category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Ddl,
    #[default]
    Unknown,
}

/// Facts recovered from one statement
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ParsedStatement {
    pub kind: StatementType,
    /// Upper-cased, in order of appearance, without aliases
    pub tables: Vec<String>,
    pub columns: Vec<String>,
    pub has_where: bool,
    pub has_join: bool,
    pub has_group_by: bool,
    pub has_order_by: bool,
}

const IDENT: &str = r"[A-Z][A-Z0-9_$#]*(?:\.[A-Z][A-Z0-9_$#]*)?";

fn pattern(source: &str) -> Regex {
    // Patterns are fixed at compile time; a bad one is a programming error
    // caught by the unit tests.
    Regex::new(&source.replace("{IDENT}", IDENT)).unwrap_or_else(|e| panic!("invalid pattern {}: {}", source, e))
}

static PLAIN_IDENT: Lazy<Regex> = Lazy::new(|| pattern(r"^{IDENT}$"));
static SUBQUERY: Lazy<Regex> = Lazy::new(|| pattern(r"\(\s*SELECT\b"));
static WHERE: Lazy<Regex> = Lazy::new(|| pattern(r"\bWHERE\b"));
static JOIN: Lazy<Regex> = Lazy::new(|| pattern(r"\bJOIN\s+({IDENT})"));
static GROUP_BY: Lazy<Regex> = Lazy::new(|| pattern(r"\bGROUP\s+BY\b"));
static ORDER_BY: Lazy<Regex> = Lazy::new(|| pattern(r"\bORDER\s+BY\b"));
static FROM_LIST: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"\bFROM\s+(.+?)(?:\bWHERE\b|\bGROUP\s+BY\b|\bORDER\s+BY\b|\bHAVING\b|\bINNER\b|\bLEFT\b|\bRIGHT\b|\bFULL\b|\bCROSS\b|\bNATURAL\b|\bJOIN\b|\bCONNECT\s+BY\b|\bSTART\s+WITH\b|\bUNION\b|\bMINUS\b|\bINTERSECT\b|\bFETCH\b|\bFOR\s+UPDATE\b|$)",
    )
});
static SELECT_LIST: Lazy<Regex> =
    Lazy::new(|| pattern(r"^SELECT\s+(?:DISTINCT\s+|UNIQUE\s+|ALL\s+)?(.+?)\s+FROM\b"));
static SELECT_ITEM: Lazy<Regex> = Lazy::new(|| pattern(r"^({IDENT})(?:\s+(?:AS\s+)?{IDENT})?$"));
static STAR_ITEM: Lazy<Regex> = Lazy::new(|| pattern(r"^(?:{IDENT}\.)?\*$"));
static INSERT: Lazy<Regex> = Lazy::new(|| pattern(r"^INSERT\s+INTO\s+({IDENT})(?:\s*\(([^)]*)\))?"));
static UPDATE: Lazy<Regex> = Lazy::new(|| pattern(r"^UPDATE\s+({IDENT})"));
static SET_LIST: Lazy<Regex> = Lazy::new(|| pattern(r"\bSET\s+(.+?)(?:\bWHERE\b|$)"));
static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| pattern(r"^({IDENT})\s*="));
static DELETE: Lazy<Regex> = Lazy::new(|| pattern(r"^DELETE\s+(?:FROM\s+)?({IDENT})"));
static MERGE: Lazy<Regex> = Lazy::new(|| pattern(r"^MERGE\s+INTO\s+({IDENT})"));
static USING: Lazy<Regex> = Lazy::new(|| pattern(r"\bUSING\s+({IDENT})"));
static DDL_TABLE: Lazy<Regex> = Lazy::new(|| {
    pattern(r"^(?:CREATE|ALTER|DROP|TRUNCATE)\s+(?:GLOBAL\s+TEMPORARY\s+)?TABLE\s+({IDENT})")
});
static DDL_INDEX: Lazy<Regex> =
    Lazy::new(|| pattern(r"^CREATE\s+(?:UNIQUE\s+|BITMAP\s+)?INDEX\s+{IDENT}\s+ON\s+({IDENT})"));
static PLSQL_BLOCK: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"^(?:BEGIN|DECLARE|CREATE\s+(?:OR\s+REPLACE\s+)?(?:(?:NON)?EDITIONABLE\s+)?(?:PROCEDURE|FUNCTION|PACKAGE|TRIGGER|TYPE))\b",
    )
});

/// Lexical statement classifier
pub struct SqlStatementParser;

impl SqlStatementParser {
    /// Classify `sql`; never fails
    pub fn parse(sql: &str) -> ParsedStatement {
        let stripped = strip(sql);
        let text = normalize(&stripped.text);
        let text = text.trim_start_matches('(').trim_start();

        let kind = classify(text);
        if matches!(kind, StatementType::Unknown) {
            return ParsedStatement::default();
        }

        let mut parsed = ParsedStatement {
            kind,
            has_where: WHERE.is_match(text),
            has_join: JOIN.is_match(text),
            has_group_by: GROUP_BY.is_match(text),
            has_order_by: ORDER_BY.is_match(text),
            ..Default::default()
        };

        if stripped.quoted_identifier || SUBQUERY.is_match(text) {
            return parsed;
        }

        match kind {
            StatementType::Select => {
                let from = from_tables(text);
                if from.len() > 1 {
                    parsed.has_join = true;
                }
                parsed.tables = from;
                parsed.tables.extend(captures(&JOIN, text));
                parsed.columns = select_columns(text);
            }
            StatementType::Insert => {
                if let Some(caps) = INSERT.captures(text) {
                    parsed.tables.push(caps[1].to_string());
                    if let Some(list) = caps.get(2) {
                        parsed.columns = split_top_level(list.as_str())
                            .into_iter()
                            .filter(|c| PLAIN_IDENT.is_match(c))
                            .map(|c| last_part(&c))
                            .collect();
                    }
                }
                parsed.tables.extend(from_tables(text));
            }
            StatementType::Update => {
                parsed.tables.extend(captures(&UPDATE, text));
                parsed.columns = set_columns(text);
            }
            StatementType::Delete => {
                parsed.tables.extend(captures(&DELETE, text));
            }
            StatementType::Merge => {
                parsed.tables.extend(captures(&MERGE, text));
                parsed.tables.extend(captures(&USING, text));
                parsed.columns = set_columns(text);
            }
            StatementType::Ddl => {
                parsed.tables.extend(captures(&DDL_TABLE, text));
                parsed.tables.extend(captures(&DDL_INDEX, text));
            }
            StatementType::Unknown => {}
        }

        dedup(&mut parsed.tables);
        dedup(&mut parsed.columns);
        parsed
    }
}

/// Split a script into statements
///
/// Statements end at a top-level `;` or at a line holding only `/`. PL/SQL
/// blocks and stored program units keep their inner semicolons and end only
/// at `/` (or the end of the script). Terminators are not included.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = Lexer::Code;

    for line in script.split_inclusive('\n') {
        if state == Lexer::Code && line.trim() == "/" {
            finish(&mut statements, &mut current);
            continue;
        }

        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match state {
                Lexer::Code => match c {
                    '\'' => {
                        state = Lexer::Literal;
                        current.push(c);
                    }
                    '"' => {
                        state = Lexer::Quoted;
                        current.push(c);
                    }
                    '-' if chars.peek() == Some(&'-') => {
                        state = Lexer::LineComment;
                        current.push(c);
                    }
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        state = Lexer::BlockComment;
                        current.push_str("/*");
                    }
                    ';' if !is_plsql_block(&current) => finish(&mut statements, &mut current),
                    _ => current.push(c),
                },
                Lexer::Literal | Lexer::Quoted => {
                    current.push(c);
                    let close = if state == Lexer::Literal { '\'' } else { '"' };
                    if c == close {
                        state = Lexer::Code;
                    }
                }
                Lexer::LineComment => {
                    current.push(c);
                    if c == '\n' {
                        state = Lexer::Code;
                    }
                }
                Lexer::BlockComment => {
                    current.push(c);
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        current.push('/');
                        state = Lexer::Code;
                    }
                }
            }
        }

        if state == Lexer::LineComment {
            state = Lexer::Code;
        }
    }

    finish(&mut statements, &mut current);
    statements
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexer {
    Code,
    Literal,
    Quoted,
    LineComment,
    BlockComment,
}

fn finish(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim().to_string();
    current.clear();
    if !strip(&statement).text.trim().is_empty() {
        statements.push(statement);
    }
}

fn is_plsql_block(text: &str) -> bool {
    let normalized = normalize(&strip(text).text);
    PLSQL_BLOCK.is_match(normalized.trim_start())
}

struct Stripped {
    text: String,
    quoted_identifier: bool,
}

/// Remove comments, blank out string literals, and note quoted identifiers
fn strip(sql: &str) -> Stripped {
    let mut text = String::with_capacity(sql.len());
    let mut quoted_identifier = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                text.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
                text.push(' ');
            }
            '\'' => {
                // '' inside a literal closes and reopens, which nets out
                for next in chars.by_ref() {
                    if next == '\'' {
                        break;
                    }
                }
                text.push_str("''");
            }
            '"' => {
                quoted_identifier = true;
                text.push(c);
                for next in chars.by_ref() {
                    text.push(next);
                    if next == '"' {
                        break;
                    }
                }
            }
            _ => text.push(c),
        }
    }

    Stripped {
        text,
        quoted_identifier,
    }
}

/// Collapse whitespace, upper-case, drop a trailing terminator
fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(';').trim_end().to_uppercase()
}

fn classify(text: &str) -> StatementType {
    let first = text
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    match first {
        "SELECT" => StatementType::Select,
        "INSERT" => StatementType::Insert,
        "UPDATE" => StatementType::Update,
        "DELETE" => StatementType::Delete,
        "MERGE" => StatementType::Merge,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" | "COMMENT" | "GRANT" | "REVOKE" => {
            StatementType::Ddl
        }
        _ => StatementType::Unknown,
    }
}

fn captures(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text).map(|caps| caps[1].to_string()).collect()
}

fn from_tables(text: &str) -> Vec<String> {
    let mut tables = Vec::new();
    for caps in FROM_LIST.captures_iter(text) {
        for item in split_top_level(&caps[1]) {
            if let Some(name) = item.split_whitespace().next() {
                if PLAIN_IDENT.is_match(name) {
                    tables.push(name.to_string());
                }
            }
        }
    }
    tables
}

fn select_columns(text: &str) -> Vec<String> {
    let Some(caps) = SELECT_LIST.captures(text) else {
        return Vec::new();
    };

    split_top_level(&caps[1])
        .into_iter()
        .filter_map(|item| {
            if STAR_ITEM.is_match(&item) {
                Some("*".to_string())
            } else {
                SELECT_ITEM.captures(&item).map(|c| last_part(&c[1]))
            }
        })
        .collect()
}

fn set_columns(text: &str) -> Vec<String> {
    let Some(caps) = SET_LIST.captures(text) else {
        return Vec::new();
    };

    split_top_level(&caps[1])
        .into_iter()
        .filter_map(|item| ASSIGNMENT.captures(&item).map(|c| last_part(&c[1])))
        .collect()
}

/// Split on commas outside parentheses
fn split_top_level(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in list.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

fn last_part(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_string()
}

fn dedup(names: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    names.retain(|n| seen.insert(n.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select() {
        let parsed = SqlStatementParser::parse(
            "select o.id, o.amount total, c.name from orders o join customers c on c.id = o.customer_id where o.amount > 10 order by o.id",
        );
        assert_eq!(parsed.kind, StatementType::Select);
        assert_eq!(parsed.tables, vec!["ORDERS", "CUSTOMERS"]);
        assert_eq!(parsed.columns, vec!["ID", "AMOUNT", "NAME"]);
        assert!(parsed.has_where);
        assert!(parsed.has_join);
        assert!(!parsed.has_group_by);
        assert!(parsed.has_order_by);
    }

    #[test]
    fn test_comma_join_and_group_by() {
        let parsed = SqlStatementParser::parse(
            "SELECT COUNT(*), d.name FROM emp e, dept d WHERE e.dept_id = d.id GROUP BY d.name",
        );
        assert_eq!(parsed.tables, vec!["EMP", "DEPT"]);
        assert_eq!(parsed.columns, vec!["NAME"]);
        assert!(parsed.has_join);
        assert!(parsed.has_group_by);
    }

    #[test]
    fn test_dml() {
        let insert = SqlStatementParser::parse("INSERT INTO app.orders (id, status) VALUES (1, 'NEW')");
        assert_eq!(insert.kind, StatementType::Insert);
        assert_eq!(insert.tables, vec!["APP.ORDERS"]);
        assert_eq!(insert.columns, vec!["ID", "STATUS"]);

        let update = SqlStatementParser::parse("UPDATE orders SET status = 'X', amount = amount + 1 WHERE id = 3");
        assert_eq!(update.kind, StatementType::Update);
        assert_eq!(update.tables, vec!["ORDERS"]);
        assert_eq!(update.columns, vec!["STATUS", "AMOUNT"]);
        assert!(update.has_where);

        let delete = SqlStatementParser::parse("delete orders where id = 3");
        assert_eq!(delete.kind, StatementType::Delete);
        assert_eq!(delete.tables, vec!["ORDERS"]);

        let merge = SqlStatementParser::parse(
            "MERGE INTO orders t USING staging s ON (t.id = s.id) WHEN MATCHED THEN UPDATE SET t.status = s.status",
        );
        assert_eq!(merge.kind, StatementType::Merge);
        assert_eq!(merge.tables, vec!["ORDERS", "STAGING"]);
    }

    #[test]
    fn test_ddl() {
        let parsed = SqlStatementParser::parse("ALTER TABLE ORDERS ADD STATUS VARCHAR2(20)");
        assert_eq!(parsed.kind, StatementType::Ddl);
        assert_eq!(parsed.tables, vec!["ORDERS"]);

        let index = SqlStatementParser::parse("create unique index ix_a on orders (a)");
        assert_eq!(index.tables, vec!["ORDERS"]);
    }

    #[test]
    fn test_comments_and_literals_are_ignored() {
        let parsed = SqlStatementParser::parse(
            "-- from audit\nSELECT id /* from secrets */ FROM orders WHERE note = 'join from x'",
        );
        assert_eq!(parsed.tables, vec!["ORDERS"]);
        assert!(!parsed.has_join);
    }

    #[test]
    fn test_unsupported_constructs_fail_closed() {
        let cte = SqlStatementParser::parse("WITH t AS (SELECT 1 FROM dual) SELECT * FROM t");
        assert_eq!(cte, ParsedStatement::default());

        let sub = SqlStatementParser::parse("SELECT * FROM orders WHERE id IN (SELECT id FROM old)");
        assert_eq!(sub.kind, StatementType::Select);
        assert!(sub.tables.is_empty());
        assert!(sub.columns.is_empty());
        assert!(sub.has_where);

        let quoted = SqlStatementParser::parse("SELECT \"Id\" FROM \"Orders\"");
        assert_eq!(quoted.kind, StatementType::Select);
        assert!(quoted.tables.is_empty());

        assert_eq!(SqlStatementParser::parse("").kind, StatementType::Unknown);
        assert_eq!(SqlStatementParser::parse("EXPLAIN PLAN FOR x").kind, StatementType::Unknown);
    }

    #[test]
    fn test_split_statements() {
        let script = "CREATE TABLE a (id NUMBER);\n-- note; not a split\nINSERT INTO a VALUES (';');\nBEGIN\n  NULL;\nEND;\n/\nDROP TABLE a";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 4);
        assert_eq!(statements[0], "CREATE TABLE a (id NUMBER)");
        assert!(statements[1].ends_with("INSERT INTO a VALUES (';')"));
        assert_eq!(statements[2], "BEGIN\n  NULL;\nEND;");
        assert_eq!(statements[3], "DROP TABLE a");
    }

    #[test]
    fn test_split_skips_empty_statements() {
        assert!(split_statements(";;\n-- only a comment\n").is_empty());
    }
}
