//! Data module for oracle_sync
//!
//! Keyed row comparison and the fetches that feed it.

pub mod diff;
pub mod fetch;

pub use diff::{DataDelta, DataDiffer, FieldChange, Record, RowChange};
pub use fetch::{fetch_rows, primary_key_columns, table_columns};
