use medrec_core::{validate_record_id, QueryField};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Failed to read record directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse record directory: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid record id in directory: {0:?}")]
    InvalidId(String),
}

#[derive(Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    records: HashMap<String, HashMap<QueryField, String>>,
}

/// Known patients, looked up by record id before any uploaded document.
///
/// ```toml
/// [records."12345"]
/// name = "John Doe"
/// hospital = "General Hospital"
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordDirectory {
    records: HashMap<String, HashMap<QueryField, String>>,
}

impl RecordDirectory {
    pub fn from_toml(content: &str) -> Result<Self, DirectoryError> {
        let file: DirectoryFile = toml::from_str(content)?;
        if let Some(bad) = file.records.keys().find(|id| !validate_record_id(id)) {
            return Err(DirectoryError::InvalidId(bad.clone()));
        }
        Ok(Self { records: file.records })
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let content = std::fs::read_to_string(path).map_err(|source| DirectoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let directory = Self::from_toml(&content)?;
        tracing::info!("Loaded {} directory records from {}", directory.len(), path.display());
        Ok(directory)
    }

    pub fn get(&self, id: &str, field: QueryField) -> Option<&str> {
        self.records.get(id)?.get(&field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
