// flat-file/src/registry.rs

use crate::{FlatFileConfig, FlatFileLocation, FlatFileResult, FlatFileStore, RollbackOutcome};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Named flat-file stores sharing one directory, opened on first use.
///
/// Locations cross this boundary in their 12-byte serialized form.
pub struct FlatFileDatabase {
    path: PathBuf,
    config: FlatFileConfig,
    stores: RwLock<HashMap<String, Arc<FlatFileStore>>>,
}

impl FlatFileDatabase {
    pub fn new(path: impl AsRef<Path>, config: FlatFileConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a store by name, opening it on first use
    pub fn store(&self, store_name: &str) -> FlatFileResult<Arc<FlatFileStore>> {
        if let Some(store) = self.stores.read().get(store_name) {
            return Ok(Arc::clone(store));
        }

        let mut stores = self.stores.write();
        if let Some(store) = stores.get(store_name) {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(FlatFileStore::open(&self.path, store_name, self.config.clone())?);
        stores.insert(store_name.to_string(), Arc::clone(&store));

        tracing::info!(
            "Opened flat-file store {} at {}",
            store_name,
            store.current_location()
        );
        Ok(store)
    }

    /// Append `data` to a store, returning its serialized location
    pub fn write(&self, store_name: &str, data: &[u8]) -> FlatFileResult<Vec<u8>> {
        let location = self.store(store_name)?.write(data)?;
        Ok(location.encode().to_vec())
    }

    /// Read the record at a serialized location
    pub fn read(&self, store_name: &str, serialized_location: &[u8]) -> FlatFileResult<Vec<u8>> {
        let location = FlatFileLocation::decode(serialized_location)?;
        self.store(store_name)?.read(&location)
    }

    /// Serialized write cursor of a store
    pub fn current_location(&self, store_name: &str) -> FlatFileResult<Vec<u8>> {
        let location = self.store(store_name)?.current_location();
        Ok(location.encode().to_vec())
    }

    /// Roll a store back to a serialized location
    pub fn rollback(
        &self,
        store_name: &str,
        serialized_location: &[u8],
    ) -> FlatFileResult<RollbackOutcome> {
        let location = FlatFileLocation::decode(serialized_location)?;
        self.store(store_name)?.rollback(&location)
    }

    /// Close every opened store, returning the first failure
    pub fn close(&self) -> FlatFileResult<()> {
        let stores = self.stores.read();
        let mut result = Ok(());

        for (name, store) in stores.iter() {
            if let Err(e) = store.close() {
                tracing::error!("Failed to close flat-file store {}: {}", name, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        result
    }
}
