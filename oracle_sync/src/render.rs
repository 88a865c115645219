//! Text and JSON output for the command line

use std::fmt::Write;

use clap::ValueEnum;
use serde::Serialize;

use oracle_sync::schema::{ColumnMetadata, SchemaDelta, Statement};
use oracle_sync::{DataDelta, OutcomeStatus, ParsedStatement, SchemaSnapshot, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn column_line(column: &ColumnMetadata) -> String {
    let mut line = format!("{} {}", column.name, column.type_sql());
    if let Some(default) = column.normalized_default() {
        let _ = write!(line, " DEFAULT {}", default);
    }
    if !column.nullable {
        line.push_str(" NOT NULL");
    }
    line
}

pub fn snapshot(snapshot: &SchemaSnapshot, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return json(snapshot);
    }

    let mut out = format!(
        "Schema {} ({} tables, captured {}, fingerprint {})\n",
        snapshot.owner(),
        snapshot.tables().len(),
        snapshot.captured_at().format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.fingerprint()
    );
    for table in snapshot.tables() {
        let _ = writeln!(
            out,
            "  {} ({} columns, {} constraints, {} indexes)",
            table.name,
            table.columns.len(),
            table.constraints.len(),
            table.indexes.len()
        );
    }
    Ok(out)
}

pub fn delta(delta: &SchemaDelta, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return json(delta);
    }
    if delta.is_empty() {
        return Ok("Schemas are identical\n".to_string());
    }

    let mut out = String::new();
    for table in &delta.added_tables {
        let _ = writeln!(out, "+ table {}", table.name);
        for column in &table.columns {
            let _ = writeln!(out, "    {}", column_line(column));
        }
    }
    for table in &delta.removed_tables {
        let _ = writeln!(out, "- table {}", table.name);
    }
    for table in &delta.modified_tables {
        let _ = writeln!(out, "~ table {}", table.name);
        for column in &table.added_columns {
            let _ = writeln!(out, "    + column {}", column_line(column));
        }
        for column in &table.removed_columns {
            let _ = writeln!(out, "    - column {}", column.name);
        }
        for change in &table.modified_columns {
            let fields: Vec<String> = change.fields.iter().map(|f| f.to_string()).collect();
            let _ = writeln!(
                out,
                "    ~ column {}: {} -> {} ({})",
                change.name(),
                column_line(&change.from),
                column_line(&change.to),
                fields.join(", ")
            );
        }
        for constraint in &table.added_constraints {
            let _ = writeln!(out, "    + {} {}", constraint.kind, constraint.name);
        }
        for constraint in &table.removed_constraints {
            let _ = writeln!(out, "    - {} {}", constraint.kind, constraint.name);
        }
        for index in &table.added_indexes {
            let _ = writeln!(out, "    + index {} ({})", index.name, index.columns.join(", "));
        }
        for index in &table.removed_indexes {
            let _ = writeln!(out, "    - index {}", index.name);
        }
    }

    let (added, removed, modified) = delta.counts();
    let _ = writeln!(out, "{} added, {} removed, {} modified", added, removed, modified);
    Ok(out)
}

/// Statements as a runnable script
pub fn statements(statements: &[Statement], format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return json(statements);
    }

    let mut out = String::new();
    for statement in statements {
        // PL/SQL blocks end with `END;` and need the slash terminator
        if statement.sql.ends_with("END;") {
            let _ = writeln!(out, "{}\n/", statement.sql);
        } else {
            let _ = writeln!(out, "{};", statement.sql);
        }
    }
    Ok(out)
}

pub fn report(report: &SyncReport, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return json(report);
    }

    let mut out = format!(
        "Run {}{}\n",
        report.run_id,
        if report.dry_run { " (dry run)" } else { "" }
    );
    for outcome in &report.outcomes {
        let label = match outcome.status {
            OutcomeStatus::Planned => "PLANNED",
            OutcomeStatus::Committed => "OK",
            OutcomeStatus::RolledBack => "ROLLED BACK",
            OutcomeStatus::Failed => "FAILED",
            OutcomeStatus::Skipped => "SKIPPED",
        };
        let _ = writeln!(out, "[{}] {}", label, outcome.statement.sql);
        if let Some(error) = &outcome.error {
            let _ = writeln!(out, "    {}", error);
        }
    }
    let _ = writeln!(
        out,
        "{} planned, {} committed, {} rolled back, {} failed, {} skipped",
        report.count(OutcomeStatus::Planned),
        report.count(OutcomeStatus::Committed),
        report.count(OutcomeStatus::RolledBack),
        report.count(OutcomeStatus::Failed),
        report.count(OutcomeStatus::Skipped)
    );
    Ok(out)
}

pub fn data_delta(table: &str, delta: &DataDelta, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return json(delta);
    }

    let mut out = format!("Table {} keyed on {}\n", table, delta.key_columns.join(", "));
    for row in &delta.added {
        let _ = writeln!(out, "+ {}", serde_json::Value::Object(row.clone()));
    }
    for row in &delta.removed {
        let _ = writeln!(out, "- {}", serde_json::Value::Object(row.clone()));
    }
    for row in &delta.modified {
        let _ = writeln!(out, "~ {}", serde_json::Value::Object(row.key.clone()));
        for change in &row.changes {
            let _ = writeln!(out, "    {}: {} -> {}", change.field, change.from, change.to);
        }
    }
    let _ = writeln!(
        out,
        "{} added, {} removed, {} modified, {} unchanged",
        delta.added.len(),
        delta.removed.len(),
        delta.modified.len(),
        delta.unchanged
    );
    Ok(out)
}

pub fn parsed(parsed: &[(String, ParsedStatement)], format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        let facts: Vec<&ParsedStatement> = parsed.iter().map(|(_, p)| p).collect();
        return json(&facts);
    }

    let mut out = String::new();
    for (sql, facts) in parsed {
        let _ = writeln!(out, "{}", sql.lines().next().unwrap_or_default());
        let _ = writeln!(out, "  kind:    {:?}", facts.kind);
        let _ = writeln!(out, "  tables:  {}", facts.tables.join(", "));
        let _ = writeln!(out, "  columns: {}", facts.columns.join(", "));
        let mut flags = Vec::new();
        if facts.has_where {
            flags.push("where");
        }
        if facts.has_join {
            flags.push("join");
        }
        if facts.has_group_by {
            flags.push("group by");
        }
        if facts.has_order_by {
            flags.push("order by");
        }
        let _ = writeln!(out, "  clauses: {}", flags.join(", "));
    }
    Ok(out)
}
