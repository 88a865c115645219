//! Configuration handling for oracle_sync

use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::{Error, Result};

/// Load configuration from a TOML file
///
/// Passwords given through `password_env` are resolved here so that the rest
/// of the crate only ever sees a validated, self-contained structure.
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    let mut config = parse(&config_str)?;
    config.resolve_passwords()?;
    config.validate()?;

    Ok(config)
}

/// Parse configuration from TOML text without resolving secrets
pub fn parse(config_str: &str) -> Result<Config> {
    toml::from_str(config_str)
        .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))
}

/// Represents the complete oracle_sync configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub source: DatabaseConfig,
    pub target: Option<DatabaseConfig>,
    #[serde(default)]
    pub introspection: IntrospectionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.source.validate("source")?;
        if let Some(target) = &self.target {
            target.validate("target")?;
        }
        self.introspection.validate()?;
        self.sync.validate()
    }

    /// Replace `password_env` references with the variable's value
    pub fn resolve_passwords(&mut self) -> Result<()> {
        self.source.resolve_password()?;
        if let Some(target) = self.target.as_mut() {
            target.resolve_password()?;
        }
        Ok(())
    }

    /// The target connection, required by commands that write
    pub fn target(&self) -> Result<&DatabaseConfig> {
        self.target
            .as_ref()
            .ok_or_else(|| Error::ConfigError("No [target] database configured".to_string()))
    }
}

/// Oracle connection configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub service_name: Option<String>,
    pub sid: Option<String>,
    /// Full connect descriptor, overrides host/port/service
    pub dsn: Option<String>,
    pub username: String,
    pub password: Option<String>,
    pub password_env: Option<String>,
    /// Owner to introspect; defaults to the upper-cased username
    pub schema: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub timeout_seconds: u64,
}

fn default_port() -> u16 {
    1521
}

fn default_connect_timeout() -> u64 {
    30
}

impl DatabaseConfig {
    /// Build the driver connect string
    ///
    /// Service names use EZConnect (`host:port/service`); SIDs need a full
    /// descriptor because EZConnect cannot express them.
    pub fn connect_string(&self) -> String {
        if let Some(dsn) = &self.dsn {
            return dsn.clone();
        }

        match (&self.service_name, &self.sid) {
            (Some(service), _) => format!("{}:{}/{}", self.host, self.port, service),
            (None, Some(sid)) => format!(
                "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={})(PORT={}))(CONNECT_DATA=(SID={})))",
                self.host, self.port, sid
            ),
            (None, None) => format!("{}:{}", self.host, self.port),
        }
    }

    /// The owner whose objects are introspected
    pub fn owner(&self) -> String {
        self.schema
            .clone()
            .unwrap_or_else(|| self.username.clone())
            .to_uppercase()
    }

    fn resolve_password(&mut self) -> Result<()> {
        if self.password.is_some() {
            return Ok(());
        }
        if let Some(var) = &self.password_env {
            let value = std::env::var(var).map_err(|_| {
                Error::ConfigError(format!("Environment variable {} is not set", var))
            })?;
            self.password = Some(value);
        }
        Ok(())
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(Error::ConfigError(format!("[{}] username is empty", section)));
        }
        if self.dsn.is_some() {
            return Ok(());
        }
        if self.host.trim().is_empty() {
            return Err(Error::ConfigError(format!("[{}] host is empty", section)));
        }
        if self.port == 0 {
            return Err(Error::ConfigError(format!("[{}] port must be non-zero", section)));
        }
        match (&self.service_name, &self.sid) {
            (Some(_), Some(_)) => Err(Error::ConfigError(format!(
                "[{}] set either service_name or sid, not both",
                section
            ))),
            (None, None) => Err(Error::ConfigError(format!(
                "[{}] one of service_name, sid or dsn is required",
                section
            ))),
            _ => Ok(()),
        }
    }
}

/// Schema introspection configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IntrospectionConfig {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 250,
            timeout_seconds: 120,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }
}

impl IntrospectionConfig {
    fn validate(&self) -> Result<()> {
        if self.retry_attempts == 0 {
            return Err(Error::ConfigError(
                "[introspection] retry_attempts must be at least 1".to_string(),
            ));
        }
        for pattern in self.include_tables.iter().chain(&self.exclude_tables) {
            glob::Pattern::new(pattern).map_err(|e| {
                Error::ConfigError(format!("[introspection] bad table pattern {}: {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

/// Synchronization behavior configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub dry_run: bool,
    pub stop_on_error: bool,
    pub batch_size: usize,
    pub allow_table_removal: bool,
    pub allow_column_removal: bool,
    pub guard_statements: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            stop_on_error: true,
            batch_size: 1,
            allow_table_removal: true,
            allow_column_removal: true,
            guard_statements: false,
        }
    }
}

impl SyncConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::ConfigError("[sync] batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_stdout")]
    pub stdout: bool,
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_stdout() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FULL: &str = r#"
        [source]
        host = "db1.internal"
        service_name = "ORCLPDB1"
        username = "hr"
        password = "secret"

        [target]
        host = "db2.internal"
        port = 1522
        sid = "ORCL"
        username = "hr_copy"
        password_env = "ORACLE_SYNC_TEST_UNSET_VARIABLE"
        schema = "hr_stage"

        [introspection]
        retry_attempts = 5
        exclude_tables = ["TMP_*"]

        [sync]
        dry_run = true
        batch_size = 10

        [logging]
        level = "debug"
        format = "json"
    "#;

    #[test]
    fn parses_sections_and_defaults() {
        let config = parse(FULL).unwrap();

        assert_eq!(config.source.port, 1521);
        assert_eq!(config.source.owner(), "HR");
        assert_eq!(config.introspection.retry_attempts, 5);
        assert_eq!(config.introspection.timeout_seconds, 120);
        assert_eq!(config.sync.batch_size, 10);
        assert!(config.sync.stop_on_error);
        assert!(config.logging.unwrap().stdout);

        let target = config.target.unwrap();
        assert_eq!(target.owner(), "HR_STAGE");
        assert!(target.password.is_none());
    }

    #[test]
    fn connect_strings() {
        let config = parse(FULL).unwrap();
        assert_eq!(config.source.connect_string(), "db1.internal:1521/ORCLPDB1");
        assert_eq!(
            config.target.unwrap().connect_string(),
            "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST=db2.internal)(PORT=1522))(CONNECT_DATA=(SID=ORCL)))"
        );
    }

    #[test]
    fn unresolved_password_env_is_an_error() {
        let mut config = parse(FULL).unwrap();
        let err = config.resolve_passwords().unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn rejects_service_and_sid_together() {
        let mut config = parse(FULL).unwrap();
        config.source.sid = Some("ORCL".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = parse(FULL).unwrap();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn dsn_skips_host_checks() {
        let config = parse(
            r#"
            [source]
            dsn = "tcps://db:2484/svc"
            username = "scott"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.source.connect_string(), "tcps://db:2484/svc");
    }
}
