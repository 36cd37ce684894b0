// storage/src/db.rs

use crate::keys::flat_files_bucket;
use crate::transaction::append_to_store;
use crate::writers::StoreWriters;
use crate::{
    Bucket, Cursor, DataDirLock, DatabaseConfig, Key, KvStore, StorageError, StorageResult,
    Transaction,
};
use flat_file::{FlatFileDatabase, FlatFileLocation};

/// Main database interface: metadata in RocksDB, payloads in flat files.
///
/// Opening a database takes an exclusive lock on its directory and repairs
/// every flat-file store back to its last committed write cursor.
pub struct Database {
    kv: KvStore,
    flat_files: FlatFileDatabase,
    writers: StoreWriters,
    config: DatabaseConfig,
    // Dropped last, after every store is closed
    _lock: DataDirLock,
}

impl Database {
    /// Open or create database
    pub fn open(config: DatabaseConfig) -> StorageResult<Self> {
        let lock = DataDirLock::acquire(config.data_dir())?;
        let kv = KvStore::open(config.metadata_dir(), &config)?;
        let flat_files = FlatFileDatabase::new(config.data_dir(), config.flat_file.clone());

        let db = Self {
            kv,
            flat_files,
            writers: StoreWriters::default(),
            config,
            _lock: lock,
        };
        db.initialize()?;

        tracing::info!("Database opened at {}", db.config.path);
        Ok(db)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    pub fn flat_files(&self) -> &FlatFileDatabase {
        &self.flat_files
    }

    /// Begin a transaction spanning both stores
    pub fn begin(&self) -> StorageResult<Transaction<'_>> {
        Ok(Transaction::new(
            self.kv.begin()?,
            &self.flat_files,
            &self.writers,
        ))
    }

    pub fn put(&self, key: &Key, value: &[u8]) -> StorageResult<()> {
        self.kv.put(key, value)
    }

    pub fn get(&self, key: &Key) -> StorageResult<Vec<u8>> {
        self.kv.get(key)
    }

    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        self.kv.has(key)
    }

    pub fn delete(&self, key: &Key) -> StorageResult<()> {
        self.kv.delete(key)
    }

    pub fn cursor(&self, bucket: &Bucket) -> StorageResult<Cursor<'_>> {
        self.kv.cursor(bucket)
    }

    /// Append outside a transaction. The new write cursor is committed
    /// immediately. Waits while an open transaction holds the store.
    pub fn append_to_store(&self, store_name: &str, data: &[u8]) -> StorageResult<Vec<u8>> {
        let _permit = self.writers.acquire(store_name);
        append_to_store(&self.flat_files, store_name, data, |key, current| {
            self.kv.put(key, current)
        })
    }

    pub fn retrieve_from_store(&self, store_name: &str, location: &[u8]) -> StorageResult<Vec<u8>> {
        Ok(self.flat_files.read(store_name, location)?)
    }

    /// Flush the metadata store and close every flat-file store
    pub fn close(self) -> StorageResult<()> {
        let flat_result = self.flat_files.close();
        self.kv.flush()?;
        flat_result?;

        tracing::info!("Database closed at {}", self.config.path);
        Ok(())
    }

    // Roll every store with a committed cursor back to it. Anything written
    // after the last commit is data whose metadata never landed.
    fn initialize(&self) -> StorageResult<()> {
        let cursors = self.committed_cursors()?;
        let mut repaired = 0;

        for (store_name, committed) in &cursors {
            if self.repair_store(store_name, committed)? {
                repaired += 1;
            }
        }

        tracing::info!(
            "Checked {} flat-file stores, {} rolled back to their committed cursor",
            cursors.len(),
            repaired
        );
        Ok(())
    }

    fn committed_cursors(&self) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let mut cursor = self.kv.cursor(&flat_files_bucket())?;
        let mut cursors = Vec::new();

        while cursor.next()? {
            let key = cursor.key()?;
            let store_name = String::from_utf8(key.suffix().to_vec()).map_err(|_| {
                StorageError::Corruption(format!("invalid flat-file store name in key {}", key))
            })?;
            cursors.push((store_name, cursor.value()?));
        }

        cursor.close()?;
        Ok(cursors)
    }

    fn repair_store(&self, store_name: &str, committed: &[u8]) -> StorageResult<bool> {
        let current = self.flat_files.current_location(store_name)?;
        if current == committed {
            tracing::debug!("Store {} matches its committed cursor", store_name);
            return Ok(false);
        }

        tracing::warn!(
            "Store {} is at {}, rolling back to committed cursor {}",
            store_name,
            describe(&current),
            describe(committed)
        );

        let outcome = self.flat_files.rollback(store_name, committed)?;
        for warning in outcome.warnings() {
            tracing::warn!("Repair of store {}: {}", store_name, warning);
        }
        Ok(true)
    }
}

fn describe(serialized: &[u8]) -> String {
    match FlatFileLocation::decode(serialized) {
        Ok(location) => location.to_string(),
        Err(_) => format!("0x{}", hex::encode(serialized)),
    }
}
