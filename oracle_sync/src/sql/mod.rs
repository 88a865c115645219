//! SQL text helpers: a lexical statement classifier and a SELECT builder

pub mod builder;
pub mod parser;

pub use builder::{text_expression, SelectBuilder, ValueEncoding};
pub use parser::{split_statements, ParsedStatement, SqlStatementParser, StatementType};
