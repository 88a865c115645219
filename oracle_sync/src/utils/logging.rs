//! Logging utilities for oracle_sync
//!
//! This module provides logging setup and configuration.

use std::fs::File;
use std::path::Path;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Parse a level name, defaulting to INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging based on configuration
///
/// Without a configuration, warnings and errors go to stderr. `RUST_LOG`
/// directives are honoured in addition to the configured level.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<()> {
    let (level, json, file, stdout) = match config {
        Some(cfg) => (
            parse_level(&cfg.level),
            cfg.format.eq_ignore_ascii_case("json"),
            cfg.file.as_deref(),
            cfg.stdout,
        ),
        None => (Level::WARN, false, None, false),
    };

    let directive = format!("oracle_sync={}", level)
        .parse::<Directive>()
        .map_err(|e| Error::ConfigError(format!("Invalid log level: {}", e)))?;
    let env_filter = EnvFilter::from_default_env().add_directive(directive);

    let builder = fmt::Subscriber::builder().with_env_filter(env_filter);

    let installed = if let Some(file_path) = file {
        if let Some(parent) = Path::new(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(file_path)?;
        let builder = builder.with_ansi(false).with_writer(file);
        if json {
            tracing::subscriber::set_global_default(builder.json().finish())
        } else {
            tracing::subscriber::set_global_default(builder.finish())
        }
    } else if stdout {
        if json {
            tracing::subscriber::set_global_default(builder.json().finish())
        } else {
            tracing::subscriber::set_global_default(builder.finish())
        }
    } else {
        let builder = builder.with_writer(std::io::stderr);
        if json {
            tracing::subscriber::set_global_default(builder.json().finish())
        } else {
            tracing::subscriber::set_global_default(builder.finish())
        }
    };

    installed.map_err(|e| Error::ConfigError(format!("Logging already initialised: {}", e)))
}
