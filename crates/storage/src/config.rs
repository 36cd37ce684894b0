// storage/src/config.rs

use crate::{StorageError, StorageResult};
use flat_file::FlatFileConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the metadata store's directory under the database path
pub const METADATA_DIR: &str = "metadata";

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub create_if_missing: bool,
    pub max_open_files: i32,
    pub write_buffer_size: usize,
    /// Fsync the RocksDB WAL on every commit
    pub sync_writes: bool,
    pub flat_file: FlatFileConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
            create_if_missing: true,
            max_open_files: 1024,
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
            sync_writes: true,
            flat_file: FlatFileConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Configuration rooted at `path`, everything else default
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = toml::from_str(&contents).map_err(|e| {
            StorageError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| StorageError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            StorageError::Config(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir().join(METADATA_DIR)
    }
}
