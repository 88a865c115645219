//! Utilities for oracle_sync
//!
//! This module provides utility functions used across the library.

pub mod identifiers;
pub mod logging;

// Re-export key utility functions
pub use identifiers::{fold, quote, quote_literal, same};
pub use logging::init_logging;
