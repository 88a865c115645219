//! Type definitions for database schema objects

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::identifiers::{self, fold};

/// Point-in-time capture of one owner's tables
///
/// Immutable once built: the diff and generator only ever read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    owner: String,
    tables: Vec<TableMetadata>,
    captured_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    /// Capture a snapshot now
    pub fn new(owner: &str, tables: Vec<TableMetadata>) -> Self {
        Self::captured(owner, tables, Utc::now())
    }

    /// Build a snapshot with an explicit capture time
    pub fn captured(owner: &str, tables: Vec<TableMetadata>, captured_at: DateTime<Utc>) -> Self {
        Self {
            owner: owner.to_string(),
            tables,
            captured_at,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn tables(&self) -> &[TableMetadata] {
        &self.tables
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Look up a table case-insensitively
    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        let key = fold(name);
        self.tables.iter().find(|t| fold(&t.name) == key)
    }

    /// Check the snapshot is complete enough to compare
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(Error::ComparisonError("snapshot has no owner".to_string()));
        }

        if let Some((a, b)) =
            identifiers::find_case_conflict(self.tables.iter().map(|t| t.name.as_str()))
        {
            return Err(Error::ComparisonError(format!(
                "snapshot of {} lists table {} twice (as {} and {})",
                self.owner,
                fold(&a),
                a,
                b
            )));
        }

        for table in &self.tables {
            table.validate().map_err(|message| {
                Error::ComparisonError(format!("snapshot of {} is incomplete: {}", self.owner, message))
            })?;
        }

        Ok(())
    }

    /// md5 digest of the normalised structure
    ///
    /// Capture time, table and column order and identifier case do not
    /// contribute, so two structurally equal schemas share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut tables: Vec<String> = self.tables.iter().map(TableMetadata::canonical).collect();
        tables.sort();
        format!("{:x}", md5::compute(tables.join("\n").as_bytes()))
    }
}

/// Represents a database table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
    #[serde(default)]
    pub constraints: Vec<ConstraintMetadata>,
    #[serde(default)]
    pub indexes: Vec<IndexMetadata>,
}

impl TableMetadata {
    /// Create a new table with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_constraint(mut self, constraint: ConstraintMetadata) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_index(mut self, index: IndexMetadata) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        let key = fold(name);
        self.columns.iter().find(|c| fold(&c.name) == key)
    }

    pub fn constraint(&self, name: &str) -> Option<&ConstraintMetadata> {
        let key = fold(name);
        self.constraints.iter().find(|c| fold(&c.name) == key)
    }

    pub fn primary_key(&self) -> Option<&ConstraintMetadata> {
        self.constraints.iter().find(|c| c.kind == ConstraintKind::PrimaryKey)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ConstraintMetadata> {
        self.constraints.iter().filter(|c| c.kind == ConstraintKind::ForeignKey)
    }

    /// Tables this one references through foreign keys, folded
    pub fn referenced_tables(&self) -> Vec<String> {
        self.foreign_keys()
            .filter_map(|fk| fk.referenced_table.as_deref())
            .map(fold)
            .filter(|t| *t != fold(&self.name))
            .collect()
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("a table has an empty name".to_string());
        }
        if self.columns.is_empty() {
            return Err(format!("table {} has no columns", self.name));
        }
        if self.columns.iter().any(|c| c.name.trim().is_empty()) {
            return Err(format!("table {} has a column with an empty name", self.name));
        }
        if let Some((a, b)) =
            identifiers::find_case_conflict(self.columns.iter().map(|c| c.name.as_str()))
        {
            return Err(format!("table {} lists column {} twice ({} and {})", self.name, fold(&a), a, b));
        }
        if self.constraints.iter().any(|c| c.name.trim().is_empty()) {
            return Err(format!("table {} has an unnamed constraint", self.name));
        }
        if self.indexes.iter().any(|i| i.name.trim().is_empty()) {
            return Err(format!("table {} has an unnamed index", self.name));
        }
        Ok(())
    }

    fn canonical(&self) -> String {
        let mut columns: Vec<String> = self.columns.iter().map(ColumnMetadata::canonical).collect();
        columns.sort();
        let mut constraints: Vec<String> =
            self.constraints.iter().map(ConstraintMetadata::canonical).collect();
        constraints.sort();
        let mut indexes: Vec<String> = self.indexes.iter().map(IndexMetadata::canonical).collect();
        indexes.sort();
        format!(
            "{}({})[{}]{{{}}}",
            fold(&self.name),
            columns.join(","),
            constraints.join(","),
            indexes.join(",")
        )
    }
}

/// Represents a database column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    /// Character or byte length for character and RAW types
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<i32>,
}

impl ColumnMetadata {
    /// Create a new nullable column with the given name and type
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            default: None,
            length: None,
            precision: None,
            scale: None,
        }
    }

    /// Set whether the column is nullable
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set a default value expression for the column
    pub fn default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32, scale: i32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// The default with the whitespace Oracle keeps around it removed
    pub fn normalized_default(&self) -> Option<&str> {
        self.default
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("NULL"))
    }

    /// Render the Oracle type, e.g. `VARCHAR2(20)` or `NUMBER(10,2)`
    pub fn type_sql(&self) -> String {
        let base = self.data_type.trim().to_uppercase();
        if base.contains('(') {
            return base;
        }

        match base.as_str() {
            "VARCHAR2" | "NVARCHAR2" | "VARCHAR" | "CHAR" | "NCHAR" | "RAW" => match self.length {
                Some(len) => format!("{}({})", base, len),
                None => base,
            },
            "NUMBER" | "DECIMAL" | "NUMERIC" => match (self.precision, self.scale) {
                (Some(p), Some(s)) if s != 0 => format!("{}({},{})", base, p, s),
                (Some(p), _) => format!("{}({})", base, p),
                (None, Some(0)) => "INTEGER".to_string(),
                _ => base,
            },
            "FLOAT" => match self.precision {
                Some(p) => format!("FLOAT({})", p),
                None => base,
            },
            _ => base,
        }
    }

    fn canonical(&self) -> String {
        format!(
            "{} {} {} {}",
            fold(&self.name),
            self.type_sql(),
            if self.nullable { "NULL" } else { "NOT NULL" },
            self.normalized_default().unwrap_or("")
        )
    }
}

/// Kind of a table constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
    /// A dictionary constraint type this crate cannot render (view
    /// constraints, REF columns...)
    Other(String),
}

impl ConstraintKind {
    /// Map an `ALL_CONSTRAINTS.CONSTRAINT_TYPE` code
    pub fn from_oracle_code(code: &str) -> Self {
        match code.trim() {
            "P" => ConstraintKind::PrimaryKey,
            "R" => ConstraintKind::ForeignKey,
            "U" => ConstraintKind::Unique,
            "C" => ConstraintKind::Check,
            other => ConstraintKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::PrimaryKey => write!(f, "PRIMARY KEY"),
            ConstraintKind::ForeignKey => write!(f, "FOREIGN KEY"),
            ConstraintKind::Unique => write!(f, "UNIQUE"),
            ConstraintKind::Check => write!(f, "CHECK"),
            ConstraintKind::Other(code) => write!(f, "constraint type {}", code),
        }
    }
}

/// Represents a table constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintMetadata {
    pub name: String,
    pub kind: ConstraintKind,
    #[serde(default)]
    pub columns: Vec<String>,
    pub referenced_table: Option<String>,
    #[serde(default)]
    pub referenced_columns: Vec<String>,
    /// `CASCADE` or `SET NULL`; Oracle has no other delete rules
    pub on_delete: Option<String>,
    pub condition: Option<String>,
    /// Name assigned by Oracle (`SYS_C...`); such names differ between
    /// databases and do not take part in comparisons
    #[serde(default)]
    pub generated: bool,
}

impl ConstraintMetadata {
    fn bare(name: &str, kind: ConstraintKind, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_table: None,
            referenced_columns: Vec::new(),
            on_delete: None,
            condition: None,
            generated: false,
        }
    }

    pub fn primary_key(name: &str, columns: &[&str]) -> Self {
        Self::bare(name, ConstraintKind::PrimaryKey, columns)
    }

    pub fn unique(name: &str, columns: &[&str]) -> Self {
        Self::bare(name, ConstraintKind::Unique, columns)
    }

    pub fn check(name: &str, condition: &str) -> Self {
        let mut c = Self::bare(name, ConstraintKind::Check, &[]);
        c.condition = Some(condition.to_string());
        c
    }

    pub fn foreign_key(
        name: &str,
        columns: &[&str],
        referenced_table: &str,
        referenced_columns: &[&str],
    ) -> Self {
        let mut c = Self::bare(name, ConstraintKind::ForeignKey, columns);
        c.referenced_table = Some(referenced_table.to_string());
        c.referenced_columns = referenced_columns.iter().map(|c| c.to_string()).collect();
        c
    }

    pub fn on_delete(mut self, rule: &str) -> Self {
        self.on_delete = Some(rule.to_string());
        self
    }

    /// Mark the name as system generated
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Structural equality, ignoring identifier case and condition whitespace
    ///
    /// System-generated names are left out, so an unnamed constraint matches
    /// its counterpart in another database.
    pub fn same_definition(&self, other: &ConstraintMetadata) -> bool {
        self.canonical() == other.canonical()
    }

    fn canonical(&self) -> String {
        let fold_all = |cols: &[String]| cols.iter().map(|c| fold(c)).collect::<Vec<_>>().join(",");
        let condition = self
            .condition
            .as_deref()
            .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let name = if self.generated { "~".to_string() } else { fold(&self.name) };
        format!(
            "{}:{}({})->{}({}) {} {}",
            name,
            self.kind,
            fold_all(&self.columns),
            self.referenced_table.as_deref().map(fold).unwrap_or_default(),
            fold_all(&self.referenced_columns),
            self.on_delete.as_deref().map(fold).unwrap_or_default(),
            condition
        )
    }
}

/// Represents an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexMetadata {
    pub fn new(name: &str, columns: &[&str], unique: bool) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        }
    }

    pub fn same_definition(&self, other: &IndexMetadata) -> bool {
        self.canonical() == other.canonical()
    }

    fn canonical(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| fold(c)).collect();
        format!(
            "{}{}({})",
            if self.unique { "UNIQUE " } else { "" },
            fold(&self.name),
            columns.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableMetadata {
        TableMetadata::new("ORDERS")
            .with_column(ColumnMetadata::new("ID", "NUMBER").precision(10, 0).nullable(false))
            .with_column(ColumnMetadata::new("AMOUNT", "NUMBER").precision(12, 2))
            .with_constraint(ConstraintMetadata::primary_key("PK_ORDERS", &["ID"]))
    }

    #[test]
    fn test_type_sql() {
        assert_eq!(ColumnMetadata::new("S", "VARCHAR2").length(20).type_sql(), "VARCHAR2(20)");
        assert_eq!(ColumnMetadata::new("A", "NUMBER").precision(12, 2).type_sql(), "NUMBER(12,2)");
        assert_eq!(ColumnMetadata::new("I", "NUMBER").precision(10, 0).type_sql(), "NUMBER(10)");
        assert_eq!(ColumnMetadata::new("N", "number").type_sql(), "NUMBER");
        assert_eq!(ColumnMetadata::new("T", "TIMESTAMP(6)").type_sql(), "TIMESTAMP(6)");
        assert_eq!(ColumnMetadata::new("D", "DATE").length(7).type_sql(), "DATE");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let snapshot = SchemaSnapshot::new("SALES", vec![orders()]);
        assert!(snapshot.table("orders").is_some());
        assert!(snapshot.table("orders").unwrap().column("amount").is_some());
        assert!(snapshot.table("customers").is_none());
    }

    #[test]
    fn test_validate_rejects_incomplete_snapshots() {
        assert!(SchemaSnapshot::new("SALES", vec![orders()]).validate().is_ok());
        assert!(SchemaSnapshot::new("", vec![orders()]).validate().is_err());
        assert!(SchemaSnapshot::new("SALES", vec![TableMetadata::new("EMPTY")])
            .validate()
            .is_err());
        let dup = SchemaSnapshot::new("SALES", vec![orders(), TableMetadata {
            name: "orders".to_string(),
            ..orders()
        }]);
        let err = dup.validate().unwrap_err();
        assert!(err.to_string().contains("ORDERS"));
    }

    #[test]
    fn test_fingerprint_ignores_order_and_case() {
        let customers = TableMetadata::new("CUSTOMERS").with_column(ColumnMetadata::new("ID", "NUMBER"));
        let a = SchemaSnapshot::new("SALES", vec![orders(), customers.clone()]);
        let mut lower = customers;
        lower.name = "customers".to_string();
        let b = SchemaSnapshot::new("SALES", vec![lower, orders()]);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = SchemaSnapshot::new("SALES", vec![orders()]);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_constraint_definitions() {
        let a = ConstraintMetadata::check("CK_AMOUNT", "AMOUNT  >= 0");
        let b = ConstraintMetadata::check("ck_amount", "AMOUNT >= 0");
        assert!(a.same_definition(&b));
        assert_eq!(ConstraintKind::from_oracle_code("R"), ConstraintKind::ForeignKey);
        assert_eq!(ConstraintKind::from_oracle_code("V"), ConstraintKind::Other("V".to_string()));
    }

    #[test]
    fn test_generated_names_do_not_count() {
        let a = ConstraintMetadata::primary_key("SYS_C0011111", &["ID"]).generated();
        let b = ConstraintMetadata::primary_key("SYS_C0022222", &["ID"]).generated();
        assert!(a.same_definition(&b));

        let named = ConstraintMetadata::primary_key("SYS_C0011111", &["ID"]);
        assert!(!a.same_definition(&named));

        let with = |c: ConstraintMetadata| SchemaSnapshot::new("SALES", vec![orders().with_constraint(c)]);
        assert_eq!(
            with(ConstraintMetadata::check("SYS_C1", "AMOUNT > 0").generated()).fingerprint(),
            with(ConstraintMetadata::check("SYS_C2", "AMOUNT > 0").generated()).fingerprint()
        );
    }
}
