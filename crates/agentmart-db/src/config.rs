//! Storage configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{DbError, DbResult};

/// Which backend holds the repositories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; lost on exit
    #[default]
    Memory,
    /// Embedded sled database on disk
    Sled,
}

/// Storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory of the sled database; required for the sled backend
    pub sled_path: Option<PathBuf>,
}

impl StorageConfig {
    /// In-memory storage
    pub fn memory() -> Self {
        Self::default()
    }

    /// Sled storage rooted at `path`
    pub fn sled(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Sled,
            sled_path: Some(path.into()),
        }
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.backend == StorageBackend::Sled {
            match &self.sled_path {
                Some(path) if !path.as_os_str().is_empty() => {}
                _ => {
                    return Err(DbError::InvalidConfig(
                        "storage.sled_path is required for the sled backend".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }
}
