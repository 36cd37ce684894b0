// storage/src/lib.rs

//! Persistent Storage Layer
//!
//! This crate combines two stores into one database:
//! - RocksDB for metadata: bucketed keys, prefix cursors, snapshot + batch
//!   transactions
//! - Flat files for large immutable payloads such as raw blocks
//!
//! A transaction spans both. Flat-file appends are durable immediately and
//! the transaction's commit records how far each store was written; on open
//! the database rolls every store back to its last committed position.

pub mod config;
pub mod cursor;
pub mod db;
pub mod keys;
pub mod kv;
pub mod kv_transaction;
pub mod lock;
pub mod transaction;
mod writers;

pub use config::DatabaseConfig;
pub use cursor::Cursor;
pub use db::Database;
pub use flat_file::{FlatFileConfig, FlatFileError, RollbackOutcome, RollbackWarning};
pub use keys::{Bucket, Key};
pub use kv::KvStore;
pub use kv_transaction::KvTransaction;
pub use lock::DataDirLock;
pub use transaction::Transaction;

use std::path::PathBuf;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Closed resource: {0}")]
    ClosedResource(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data directory is already locked by another process: {}", .0.display())]
    AlreadyLocked(PathBuf),

    #[error("Flat-file error: {0}")]
    FlatFile(#[from] FlatFileError),
}

impl StorageError {
    /// Whether the requested key or record does not exist, from either store
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::FlatFile(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Whether stored data failed verification, in either store
    pub fn is_corruption(&self) -> bool {
        match self {
            StorageError::Corruption(_) => true,
            StorageError::FlatFile(e) => e.is_corruption(),
            _ => false,
        }
    }

    pub fn is_closed_resource(&self) -> bool {
        matches!(self, StorageError::ClosedResource(_))
    }
}
