// flat-file/src/lib.rs

//! Append-only flat-file blob storage
//!
//! This crate provides:
//! - Fixed-size location handles for stored records
//! - Numbered, size-capped files with CRC-32C checked records
//! - A bounded LRU cache of open read handles
//! - Crash-safe rollback of a store to an earlier location
//! - A registry of named stores

pub mod location;
pub mod lockable;
pub mod lru;
pub mod registry;
pub mod rollback;
pub mod store;

pub use location::{FlatFileLocation, LOCATION_SIZE};
pub use lockable::LockableFile;
pub use lru::LruCache;
pub use registry::FlatFileDatabase;
pub use rollback::{RollbackOutcome, RollbackWarning};
pub use store::{FlatFileConfig, FlatFileStore};

/// Result type for flat-file operations
pub type FlatFileResult<T> = Result<T, FlatFileError>;

/// Errors that can occur during flat-file operations
#[derive(Debug, thiserror::Error)]
pub enum FlatFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Record of {size} bytes exceeds the maximum file size of {max} bytes")]
    RecordTooLarge { size: u64, max: u32 },
}

impl FlatFileError {
    /// Whether the error means the requested data does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, FlatFileError::NotFound(_))
    }

    /// Whether the error means stored data failed verification
    pub fn is_corruption(&self) -> bool {
        matches!(self, FlatFileError::Corruption(_))
    }
}
