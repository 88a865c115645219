mod support;

use pretty_assertions::assert_eq;
use rstest::*;
use serde_json::json;

use oracle_sync::schema::{ColumnMetadata, GeneratorOptions, StatementKind, TableMetadata};
use oracle_sync::{DataDiffer, DdlGenerator, Error, Record, SchemaDiffer, Statement};
use support::{customers, orders, snapshot};

fn sql(statements: &[Statement]) -> Vec<&str> {
    statements.iter().map(|s| s.sql.as_str()).collect()
}

fn position(statements: &[Statement], prefix: &str) -> usize {
    statements
        .iter()
        .position(|s| s.sql.starts_with(prefix))
        .unwrap_or_else(|| panic!("no statement starting with {prefix}"))
}

#[fixture]
fn generator() -> DdlGenerator {
    DdlGenerator::default()
}

#[rstest]
fn test_added_column_is_a_single_alter(generator: DdlGenerator) {
    let source = snapshot(vec![orders()]);
    let target = snapshot(vec![orders().with_column(ColumnMetadata::new("STATUS", "VARCHAR2").length(20))]);

    let statements = generator.generate(&SchemaDiffer::diff(&source, &target).unwrap()).unwrap();

    assert_eq!(sql(&statements), vec!["ALTER TABLE ORDERS ADD STATUS VARCHAR2(20)"]);
    assert_eq!(statements[0].table, "ORDERS");
    assert_eq!(statements[0].kind, StatementKind::Ddl);
}

#[rstest]
fn test_removed_table_drops_dependent_foreign_keys_first(generator: DdlGenerator) {
    let mut orders_without_fk = orders();
    orders_without_fk.constraints.retain(|c| c.name != "FK_ORDERS_CUSTOMER");

    let source = snapshot(vec![customers(), orders()]);
    let target = snapshot(vec![orders_without_fk]);
    let statements = generator.generate(&SchemaDiffer::diff(&source, &target).unwrap()).unwrap();

    assert_eq!(
        sql(&statements),
        vec![
            "ALTER TABLE ORDERS DROP CONSTRAINT FK_ORDERS_CUSTOMER",
            "DROP TABLE CUSTOMERS",
        ]
    );
}

#[rstest]
fn test_tables_are_dropped_dependents_first(generator: DdlGenerator) {
    let source = snapshot(vec![customers(), orders()]);
    let target = snapshot(vec![TableMetadata::new("AUDIT_LOG").with_column(ColumnMetadata::new("ID", "NUMBER"))]);
    let statements = generator.generate(&SchemaDiffer::diff(&source, &target).unwrap()).unwrap();

    let drop_fk = position(&statements, "ALTER TABLE ORDERS DROP CONSTRAINT FK_ORDERS_CUSTOMER");
    let drop_orders = position(&statements, "DROP TABLE ORDERS");
    let drop_customers = position(&statements, "DROP TABLE CUSTOMERS");
    let create = position(&statements, "CREATE TABLE AUDIT_LOG");

    assert!(drop_fk < drop_orders);
    assert!(drop_orders < drop_customers);
    assert!(drop_customers < create);
}

#[rstest]
fn test_new_tables_exist_before_their_constraints(generator: DdlGenerator) {
    // ORDERS is listed first but references CUSTOMERS
    let source = snapshot(vec![TableMetadata::new("AUDIT_LOG").with_column(ColumnMetadata::new("ID", "NUMBER"))]);
    let target = snapshot(vec![
        TableMetadata::new("AUDIT_LOG").with_column(ColumnMetadata::new("ID", "NUMBER")),
        orders(),
        customers(),
    ]);
    let statements = generator.generate(&SchemaDiffer::diff(&source, &target).unwrap()).unwrap();

    assert_eq!(
        sql(&statements),
        vec![
            "CREATE TABLE CUSTOMERS (\n    ID NUMBER(10) NOT NULL,\n    NAME VARCHAR2(100),\n    CONSTRAINT PK_CUSTOMERS PRIMARY KEY (ID)\n)",
            "CREATE TABLE ORDERS (\n    ID NUMBER(10) NOT NULL,\n    CUSTOMER_ID NUMBER(10),\n    CONSTRAINT PK_ORDERS PRIMARY KEY (ID)\n)",
            "CREATE INDEX IX_ORDERS_CUSTOMER ON ORDERS (CUSTOMER_ID)",
            "ALTER TABLE ORDERS ADD CONSTRAINT FK_ORDERS_CUSTOMER FOREIGN KEY (CUSTOMER_ID) REFERENCES CUSTOMERS (ID) ON DELETE CASCADE",
        ]
    );

    // Every constraint added to a table comes after that table's CREATE
    for (i, statement) in statements.iter().enumerate() {
        if statement.sql.contains("ADD CONSTRAINT") {
            let created = position(&statements, &format!("CREATE TABLE {}", statement.table));
            assert!(created < i, "{} precedes its CREATE TABLE", statement.sql);
        }
    }
}

#[rstest]
fn test_generation_is_deterministic(generator: DdlGenerator) {
    let source = snapshot(vec![customers()]);
    let target = snapshot(vec![orders(), customers().with_column(ColumnMetadata::new("EMAIL", "VARCHAR2").length(200))]);
    let delta = SchemaDiffer::diff(&source, &target).unwrap();

    assert_eq!(generator.generate(&delta).unwrap(), generator.generate(&delta).unwrap());
}

#[test]
fn test_guarded_statements_tolerate_reruns() {
    let generator = DdlGenerator::new(GeneratorOptions {
        guard_statements: true,
        ..Default::default()
    });
    let source = snapshot(vec![customers()]);
    let target = snapshot(vec![customers()
        .with_column(ColumnMetadata::new("NOTE", "VARCHAR2").length(400).default("'n/a'"))]);

    let statements = generator.generate(&SchemaDiffer::diff(&source, &target).unwrap()).unwrap();

    assert_eq!(
        sql(&statements),
        vec![
            "BEGIN\n  EXECUTE IMMEDIATE 'ALTER TABLE CUSTOMERS ADD NOTE VARCHAR2(400) DEFAULT ''n/a''';\nEXCEPTION\n  WHEN OTHERS THEN\n    IF SQLCODE NOT IN (-1430) THEN\n      RAISE;\n    END IF;\nEND;"
        ]
    );
}

#[test]
fn test_unsupported_constraint_fails_generation() {
    let mut odd = customers();
    odd.constraints.push(oracle_sync::schema::ConstraintMetadata {
        kind: oracle_sync::schema::ConstraintKind::Other("V".to_string()),
        ..oracle_sync::schema::ConstraintMetadata::unique("SYS_VIEW_CHECK", &["ID"])
    });
    let delta = SchemaDiffer::diff(&snapshot(vec![orders()]), &snapshot(vec![orders(), odd])).unwrap();

    let err = DdlGenerator::default().generate(&delta).unwrap_err();
    assert!(matches!(err, Error::GenerationError { ref table, .. } if table == "CUSTOMERS"));
}

fn records(rows: serde_json::Value) -> Vec<Record> {
    serde_json::from_value(rows).unwrap()
}

#[rstest]
fn test_row_changes_render_as_dml(generator: DdlGenerator) {
    let current = records(json!([
        {"ID": 1, "NAME": "A"},
        {"ID": 2, "NAME": "gone"},
    ]));
    let desired = records(json!([
        {"ID": 1, "NAME": "B"},
        {"ID": 3, "NAME": "O'Brien"},
    ]));
    let delta = DataDiffer::diff(&current, &desired, &["ID"]).unwrap();
    let statements = generator.generate_data("CUSTOMERS", &[], &delta).unwrap();

    assert_eq!(
        sql(&statements),
        vec![
            "DELETE FROM CUSTOMERS WHERE ID = 2",
            "UPDATE CUSTOMERS SET NAME = 'B' WHERE ID = 1",
            "INSERT INTO CUSTOMERS (ID, NAME) VALUES (3, 'O''Brien')",
        ]
    );
    assert!(statements.iter().all(|s| s.kind == StatementKind::Dml));
}
