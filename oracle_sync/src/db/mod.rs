//! Database module for oracle_sync
//!
//! This module holds the driver contract, the Oracle driver adapter and the
//! bounded-call helpers every live read and write goes through.

pub mod bounded;
pub mod connection;
pub mod executor;
pub mod session;

// Re-export key types
pub use bounded::{bounded, RetryPolicy};
pub use connection::connect;
pub use session::{Row, Session};
