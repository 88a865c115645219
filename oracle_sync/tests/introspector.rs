mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::*;

use oracle_sync::db::{RetryPolicy, Row};
use oracle_sync::schema::{
    ColumnMetadata, ConstraintMetadata, IndexMetadata, IntrospectionOptions, TableMetadata,
};
use oracle_sync::{Error, SchemaIntrospector};
use support::{dictionary, ScriptedSession};

#[fixture]
fn options() -> IntrospectionOptions {
    IntrospectionOptions {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        },
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[rstest]
#[tokio::test]
async fn test_reads_tables_columns_constraints_and_indexes(options: IntrospectionOptions) {
    let session = dictionary();
    let snapshot = SchemaIntrospector::new(&session, options)
        .introspect("app")
        .await
        .unwrap();

    let customers = TableMetadata::new("CUSTOMERS")
        .with_column(ColumnMetadata::new("ID", "NUMBER").precision(10, 0).nullable(false))
        .with_column(ColumnMetadata::new("NAME", "VARCHAR2").length(100))
        .with_constraint(ConstraintMetadata::primary_key("PK_CUSTOMERS", &["ID"]));

    let orders = TableMetadata::new("ORDERS")
        .with_column(ColumnMetadata::new("ID", "NUMBER").precision(10, 0).nullable(false))
        .with_column(ColumnMetadata::new("CUSTOMER_ID", "NUMBER").precision(10, 0))
        .with_column(ColumnMetadata::new("STATUS", "VARCHAR2").length(20).default("'NEW'"))
        .with_constraint(ConstraintMetadata::check("CK_ORDERS_STATUS", "STATUS IN ('NEW', 'DONE')"))
        .with_constraint(
            ConstraintMetadata::foreign_key("FK_ORDERS_CUSTOMER", &["CUSTOMER_ID"], "CUSTOMERS", &["ID"])
                .on_delete("CASCADE"),
        )
        .with_constraint(ConstraintMetadata::primary_key("PK_ORDERS", &["ID"]))
        .with_index(IndexMetadata::new("IX_ORDERS_CUSTOMER", &["CUSTOMER_ID"], false));

    assert_eq!(snapshot.owner(), "APP");
    assert_eq!(snapshot.tables(), &[customers, orders][..]);
}

#[rstest]
#[tokio::test]
async fn test_each_call_reads_the_database_again(options: IntrospectionOptions) {
    let session = dictionary();
    let introspector = SchemaIntrospector::new(&session, options);

    let first = introspector.introspect("APP").await.unwrap();
    let second = introspector.introspect("APP").await.unwrap();

    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(session.queries_matching("from all_tables"), 2);
}

#[rstest]
#[tokio::test]
async fn test_include_and_exclude_patterns(mut options: IntrospectionOptions) {
    options.include_tables = vec!["C*".to_string(), "ORDERS".to_string()];
    options.exclude_tables = vec!["orders".to_string()];

    let session = dictionary();
    let snapshot = SchemaIntrospector::new(&session, options)
        .introspect("APP")
        .await
        .unwrap();

    let names: Vec<&str> = snapshot.tables().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["CUSTOMERS"]);
}

#[rstest]
#[tokio::test]
async fn test_transient_failure_is_retried(options: IntrospectionOptions) {
    let session = dictionary().drop_connection_on("from all_tab_columns", 1);
    let snapshot = SchemaIntrospector::new(&session, options)
        .introspect("APP")
        .await
        .unwrap();

    assert_eq!(snapshot.tables().len(), 2);
    assert_eq!(session.queries_matching("from all_tab_columns"), 2);
}

#[rstest]
#[tokio::test]
async fn test_retries_are_bounded(options: IntrospectionOptions) {
    let session = dictionary().drop_connection_on("from all_tables", 10);
    let err = SchemaIntrospector::new(&session, options)
        .introspect("APP")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::IntrospectionError { ref object, .. } if object == "ALL_TABLES"));
    assert_eq!(session.queries_matching("from all_tables"), 3);
}

#[rstest]
#[tokio::test]
async fn test_failure_names_the_dictionary_view(options: IntrospectionOptions) {
    let session = dictionary().fail_on("from all_indexes", "ORA-00942: table or view does not exist");
    let err = SchemaIntrospector::new(&session, options)
        .introspect("APP")
        .await
        .unwrap_err();

    match err {
        Error::IntrospectionError { object, message } => {
            assert_eq!(object, "ALL_INDEXES");
            assert!(message.contains("ORA-00942"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // Permanent errors are not retried
    assert_eq!(session.queries_matching("from all_indexes"), 1);
}

#[rstest]
#[tokio::test]
async fn test_foreign_key_into_another_schema(options: IntrospectionOptions) {
    let session = ScriptedSession::new()
        .on("join all_cons_columns", vec![
            Row::new().with("TABLE_NAME", "COUNTRIES").with("COLUMN_NAME", "CODE"),
        ])
        .on("from all_tables", vec![Row::new().with("TABLE_NAME", "ADDRESSES")])
        .on("from all_tab_columns", vec![
            Row::new()
                .with("TABLE_NAME", "ADDRESSES")
                .with("COLUMN_NAME", "COUNTRY")
                .with("DATA_TYPE", "CHAR")
                .with("CHAR_LENGTH", 2)
                .with("NULLABLE", "Y"),
        ])
        .on("from all_constraints", vec![
            Row::new()
                .with("TABLE_NAME", "ADDRESSES")
                .with("CONSTRAINT_NAME", "FK_ADDRESSES_COUNTRY")
                .with("CONSTRAINT_TYPE", "R")
                .with("R_OWNER", "REF")
                .with("R_CONSTRAINT_NAME", "PK_COUNTRIES")
                .with("DELETE_RULE", "NO ACTION"),
        ])
        .on("from all_cons_columns", vec![
            Row::new()
                .with("CONSTRAINT_NAME", "FK_ADDRESSES_COUNTRY")
                .with("TABLE_NAME", "ADDRESSES")
                .with("COLUMN_NAME", "COUNTRY"),
        ]);

    let snapshot = SchemaIntrospector::new(&session, options)
        .introspect("APP")
        .await
        .unwrap();

    let fk = snapshot.table("addresses").unwrap().constraint("FK_ADDRESSES_COUNTRY").unwrap();
    assert_eq!(fk.referenced_table.as_deref(), Some("REF.COUNTRIES"));
    assert_eq!(fk.referenced_columns, vec!["CODE".to_string()]);
    assert_eq!(fk.on_delete, None);
}

#[rstest]
#[tokio::test]
async fn test_invalid_owner_is_rejected(options: IntrospectionOptions) {
    let session = dictionary();
    let err = SchemaIntrospector::new(&session, options)
        .introspect("APP; DROP TABLE X")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationError(_)));
    assert!(session.events().is_empty());
}
