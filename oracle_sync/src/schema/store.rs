//! Snapshot files
//!
//! Snapshots are stored as JSON or YAML, picked by file extension. Loaded
//! snapshots are validated before they are handed out.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::schema::types::SchemaSnapshot;

/// File formats a snapshot can be stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Yaml,
}

impl SnapshotFormat {
    /// Pick a format from the file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Ok(SnapshotFormat::Json),
            Some("yaml") | Some("yml") => Ok(SnapshotFormat::Yaml),
            _ => Err(Error::ValidationError(format!(
                "cannot tell snapshot format of {}; use .json, .yaml or .yml",
                path.display()
            ))),
        }
    }
}

/// Render a snapshot in the given format
pub fn to_string(snapshot: &SchemaSnapshot, format: SnapshotFormat) -> Result<String> {
    Ok(match format {
        SnapshotFormat::Json => serde_json::to_string_pretty(snapshot)?,
        SnapshotFormat::Yaml => serde_yaml::to_string(snapshot)?,
    })
}

/// Parse and validate a snapshot
pub fn from_str(text: &str, format: SnapshotFormat) -> Result<SchemaSnapshot> {
    let snapshot: SchemaSnapshot = match format {
        SnapshotFormat::Json => serde_json::from_str(text)?,
        SnapshotFormat::Yaml => serde_yaml::from_str(text)?,
    };
    snapshot.validate()?;
    Ok(snapshot)
}

/// Write a snapshot, creating parent directories as needed
pub fn save(snapshot: &SchemaSnapshot, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = to_string(snapshot, SnapshotFormat::from_path(path)?)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    tracing::info!(path = %path.display(), tables = snapshot.tables().len(), "Snapshot written");
    Ok(())
}

/// Read a snapshot file
pub fn load(path: impl AsRef<Path>) -> Result<SchemaSnapshot> {
    let path = path.as_ref();
    let format = SnapshotFormat::from_path(path)?;
    let text = fs::read_to_string(path)?;
    from_str(&text, format)
}
