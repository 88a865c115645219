//! Keyed row comparison

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// One row, column name to value, in select order
pub type Record = serde_json::Map<String, Value>;

/// Find a column exactly, then case-insensitively
pub fn lookup<'a>(record: &'a Record, column: &str) -> Option<&'a Value> {
    record.get(column).or_else(|| {
        record
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    })
}

/// One component of a row key
///
/// Integers sort numerically and before everything else, which sorts by text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum KeyPart {
    Int(i64),
    Text(String),
}

impl KeyPart {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => KeyPart::Int(i),
                None => KeyPart::Text(n.to_string()),
            }),
            // Drivers hand NUMBER columns over as text
            Value::String(s) => Some(match s.parse::<i64>() {
                Ok(i) if i.to_string() == *s => KeyPart::Int(i),
                _ => KeyPart::Text(s.clone()),
            }),
            other => Some(KeyPart::Text(other.to_string())),
        }
    }
}

type Key = Vec<KeyPart>;

/// A field whose value differs between the two sides
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    /// Source value
    pub from: Value,
    /// Target value
    pub to: Value,
}

/// A row present on both sides with differing non-key fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowChange {
    /// Key column values
    pub key: Record,
    pub changes: Vec<FieldChange>,
}

/// The row changes turning the source row set into the target's
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DataDelta {
    pub key_columns: Vec<String>,
    /// Rows only in the target
    pub added: Vec<Record>,
    /// Rows only in the source
    pub removed: Vec<Record>,
    pub modified: Vec<RowChange>,
    /// Rows equal on both sides
    pub unchanged: usize,
}

impl DataDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Compares keyed row sets
pub struct DataDiffer;

impl DataDiffer {
    /// Compare `source` and `target`, matching rows on `key_columns`
    ///
    /// Every row must carry a non-null value for every key column, and keys
    /// must be unique on each side. All outputs are sorted by key.
    pub fn diff<K: AsRef<str>>(source: &[Record], target: &[Record], key_columns: &[K]) -> Result<DataDelta> {
        let keys: Vec<String> = key_columns.iter().map(|k| k.as_ref().to_string()).collect();
        if keys.is_empty() {
            return Err(Error::ComparisonError(
                "at least one key column is required".to_string(),
            ));
        }

        let source_rows = index_rows("source", source, &keys)?;
        let target_rows = index_rows("target", target, &keys)?;

        let mut delta = DataDelta {
            key_columns: keys.clone(),
            ..Default::default()
        };

        for (key, row) in &source_rows {
            match target_rows.get(key) {
                None => delta.removed.push((*row).clone()),
                Some(other) => {
                    let changes = field_changes(row, other, &keys);
                    if changes.is_empty() {
                        delta.unchanged += 1;
                    } else {
                        delta.modified.push(RowChange {
                            key: key_record(row, &keys),
                            changes,
                        });
                    }
                }
            }
        }

        delta.added = target_rows
            .iter()
            .filter(|(key, _)| !source_rows.contains_key(*key))
            .map(|(_, row)| (*row).clone())
            .collect();

        tracing::debug!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            modified = delta.modified.len(),
            unchanged = delta.unchanged,
            "Data diff calculated"
        );

        Ok(delta)
    }
}

fn index_rows<'a>(side: &str, rows: &'a [Record], keys: &[String]) -> Result<BTreeMap<Key, &'a Record>> {
    let mut indexed = BTreeMap::new();

    for (index, row) in rows.iter().enumerate() {
        let mut key = Vec::with_capacity(keys.len());
        for column in keys {
            let part = lookup(row, column).and_then(KeyPart::from_value).ok_or_else(|| {
                Error::ComparisonError(format!(
                    "{} row {} has no value for key column {}",
                    side, index, column
                ))
            })?;
            key.push(part);
        }

        if indexed.insert(key, row).is_some() {
            return Err(Error::ComparisonError(format!(
                "{} row {} repeats the key of an earlier row",
                side, index
            )));
        }
    }

    Ok(indexed)
}

fn is_key(field: &str, keys: &[String]) -> bool {
    keys.iter().any(|k| k.eq_ignore_ascii_case(field))
}

fn key_record(row: &Record, keys: &[String]) -> Record {
    keys.iter()
        .map(|k| (k.clone(), lookup(row, k).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Numbers compare by value so `1` and `1.0` are equal
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn field_changes(source: &Record, target: &Record, keys: &[String]) -> Vec<FieldChange> {
    let mut fields: Vec<&String> = source.keys().filter(|f| !is_key(f, keys)).collect();
    for field in target.keys().filter(|f| !is_key(f, keys)) {
        if !fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
            fields.push(field);
        }
    }

    fields
        .into_iter()
        .filter_map(|field| {
            let from = lookup(source, field).cloned().unwrap_or(Value::Null);
            let to = lookup(target, field).cloned().unwrap_or(Value::Null);
            (!same_value(&from, &to)).then(|| FieldChange {
                field: field.clone(),
                from,
                to,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Record> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_modified_field() {
        let source = rows(json!([{"id": 1, "name": "A"}]));
        let target = rows(json!([{"id": 1, "name": "B"}]));
        let delta = DataDiffer::diff(&source, &target, &["id"]).unwrap();

        assert!(delta.added.is_empty());
        assert!(delta.removed.is_empty());
        assert_eq!(delta.modified.len(), 1);
        assert_eq!(
            delta.modified[0].changes,
            vec![FieldChange {
                field: "name".to_string(),
                from: json!("A"),
                to: json!("B"),
            }]
        );
        assert_eq!(delta.modified[0].key.get("id"), Some(&json!(1)));
    }

    #[test]
    fn test_output_is_sorted_by_key() {
        let source = rows(json!([{"id": 10}, {"id": 2}, {"id": 30}]));
        let target = rows(json!([{"id": 9}, {"id": 1}]));
        let delta = DataDiffer::diff(&source, &target, &["id"]).unwrap();

        let removed: Vec<_> = delta.removed.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(removed, vec![json!(2), json!(10), json!(30)]);
        let added: Vec<_> = delta.added.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(added, vec![json!(1), json!(9)]);
    }

    #[test]
    fn test_missing_fields_compare_as_null() {
        let source = rows(json!([{"ID": 1, "NOTE": null}]));
        let target = rows(json!([{"ID": 1}]));
        let delta = DataDiffer::diff(&source, &target, &["id"]).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.unchanged, 1);

        let target = rows(json!([{"ID": 1, "EXTRA": 5}]));
        let delta = DataDiffer::diff(&source, &target, &["ID"]).unwrap();
        assert_eq!(delta.modified[0].changes[0].field, "EXTRA");
        assert_eq!(delta.modified[0].changes[0].from, Value::Null);
    }

    #[test]
    fn test_key_errors() {
        let good = rows(json!([{"id": 1}]));
        let no_key: [&str; 0] = [];
        assert!(DataDiffer::diff(&good, &good, &no_key).is_err());

        let null_key = rows(json!([{"id": 1}, {"id": null}]));
        let err = DataDiffer::diff(&null_key, &good, &["id"]).unwrap_err();
        assert!(err.to_string().contains("source row 1"));

        let duplicate = rows(json!([{"id": 1}, {"id": 1}]));
        let err = DataDiffer::diff(&good, &duplicate, &["id"]).unwrap_err();
        assert!(err.to_string().contains("target row 1"));
    }

    #[test]
    fn test_text_integers_sort_numerically() {
        let source = rows(json!([{"id": "10"}, {"id": "9"}, {"id": "B"}, {"id": "007"}]));
        let delta = DataDiffer::diff(&source, &[], &["id"]).unwrap();
        let removed: Vec<_> = delta.removed.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(removed, vec![json!("9"), json!("10"), json!("007"), json!("B")]);
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let source = rows(json!([{"id": 1, "amount": 2}]));
        let target = rows(json!([{"id": 1, "amount": 2.0}]));
        assert!(DataDiffer::diff(&source, &target, &["id"]).unwrap().is_empty());
    }
}
