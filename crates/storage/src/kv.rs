// storage/src/kv.rs

use crate::{Bucket, Cursor, DatabaseConfig, Key, KvTransaction, StorageError, StorageResult};
use rocksdb::{Direction, ErrorKind, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::path::{Path, PathBuf};

/// Sorted key-value store for metadata, backed by RocksDB
pub struct KvStore {
    db: DB,
    path: PathBuf,
    sync_writes: bool,
}

impl KvStore {
    /// Open or create the store, repairing it once if RocksDB reports corruption
    pub fn open(path: impl AsRef<Path>, config: &DatabaseConfig) -> StorageResult<Self> {
        let path = path.as_ref();

        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.increase_parallelism(num_cpus::get() as i32);

        let db = match DB::open(&opts, path) {
            Ok(db) => db,
            Err(e) if matches!(e.kind(), ErrorKind::Corruption) => {
                tracing::warn!("Metadata store at {} is corrupted: {}", path.display(), e);
                DB::repair(&opts, path).map_err(|e| {
                    StorageError::Corruption(format!("repair of {} failed: {}", path.display(), e))
                })?;
                let db = DB::open(&opts, path)
                    .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
                tracing::info!("Repaired metadata store at {}", path.display());
                db
            }
            Err(e) => return Err(StorageError::DatabaseError(e.to_string())),
        };

        tracing::info!("Metadata store opened at {}", path.display());

        Ok(Self {
            db,
            path: path.to_path_buf(),
            sync_writes: config.sync_writes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn put(&self, key: &Key, value: &[u8]) -> StorageResult<()> {
        self.db
            .put_opt(key.bytes(), value, &self.write_options())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    /// Get a value, failing with `NotFound` if the key is absent
    pub fn get(&self, key: &Key) -> StorageResult<Vec<u8>> {
        self.db
            .get(key.bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("key {}", key)))
    }

    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        let value = self
            .db
            .get_pinned(key.bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(value.is_some())
    }

    pub fn delete(&self, key: &Key) -> StorageResult<()> {
        self.db
            .delete_opt(key.bytes(), &self.write_options())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    /// Cursor over every key in `bucket`, reading the live store
    pub fn cursor(&self, bucket: &Bucket) -> StorageResult<Cursor<'_>> {
        let prefix = bucket.path();
        let iter = self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));
        Ok(Cursor::new(iter, bucket.clone()))
    }

    /// Begin a transaction reading from a snapshot of the current state
    pub fn begin(&self) -> StorageResult<KvTransaction<'_>> {
        Ok(KvTransaction::new(self, self.db.snapshot()))
    }

    /// Compact the full key range
    pub fn compact(&self) -> StorageResult<()> {
        tracing::info!("Compacting metadata store...");
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
        tracing::info!("Metadata store compaction complete");
        Ok(())
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db
            .flush()
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    /// Apply a batch atomically
    pub(crate) fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        self.db
            .write_opt(batch, &self.write_options())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }
}
