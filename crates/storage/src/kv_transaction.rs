// storage/src/kv_transaction.rs

use crate::{Bucket, Cursor, Key, KvStore, StorageError, StorageResult};
use rocksdb::{Direction, IteratorMode, Snapshot, WriteBatch};

/// A snapshot plus a write batch.
///
/// Reads see the store as it was at `begin`; writes are buffered and applied
/// atomically by `commit`. A transaction does not read its own writes.
/// Dropping an open transaction rolls it back.
pub struct KvTransaction<'db> {
    store: &'db KvStore,
    snapshot: Option<Snapshot<'db>>,
    batch: WriteBatch,
    closed: bool,
}

impl<'db> KvTransaction<'db> {
    pub(crate) fn new(store: &'db KvStore, snapshot: Snapshot<'db>) -> Self {
        Self {
            store,
            snapshot: Some(snapshot),
            batch: WriteBatch::default(),
            closed: false,
        }
    }

    pub fn put(&mut self, key: &Key, value: &[u8]) -> StorageResult<()> {
        self.check_open("put")?;
        self.batch.put(key.bytes(), value);
        Ok(())
    }

    /// Get a value from the snapshot, failing with `NotFound` if absent
    pub fn get(&self, key: &Key) -> StorageResult<Vec<u8>> {
        self.snapshot("get")?
            .get(key.bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("key {}", key)))
    }

    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        let value = self
            .snapshot("has")?
            .get(key.bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(value.is_some())
    }

    pub fn delete(&mut self, key: &Key) -> StorageResult<()> {
        self.check_open("delete")?;
        self.batch.delete(key.bytes());
        Ok(())
    }

    /// Cursor over `bucket` as of the snapshot
    pub fn cursor(&self, bucket: &Bucket) -> StorageResult<Cursor<'_>> {
        let prefix = bucket.path();
        let iter = self
            .snapshot("open a cursor in")?
            .iterator(IteratorMode::From(&prefix, Direction::Forward));
        Ok(Cursor::new(iter, bucket.clone()))
    }

    /// Number of buffered writes
    pub fn pending_writes(&self) -> usize {
        self.batch.len()
    }

    /// Release the snapshot and apply the batch atomically
    pub fn commit(&mut self) -> StorageResult<()> {
        self.check_open("commit")?;
        let batch = std::mem::take(&mut self.batch);
        self.close();
        self.store.write_batch(batch)
    }

    /// Release the snapshot and discard the batch
    pub fn rollback(&mut self) -> StorageResult<()> {
        self.check_open("roll back")?;
        self.close();
        Ok(())
    }

    /// Roll back if neither `commit` nor `rollback` has run yet
    pub fn rollback_unless_closed(&mut self) {
        if !self.closed {
            self.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn check_open(&self, action: &str) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::ClosedResource(format!(
                "cannot {} a closed transaction",
                action
            )));
        }
        Ok(())
    }

    fn snapshot(&self, action: &str) -> StorageResult<&Snapshot<'db>> {
        self.check_open(action)?;
        self.snapshot.as_ref().ok_or_else(|| {
            StorageError::ClosedResource(format!("cannot {} a closed transaction", action))
        })
    }

    fn close(&mut self) {
        self.closed = true;
        self.snapshot = None;
        self.batch.clear();
    }
}

impl Drop for KvTransaction<'_> {
    fn drop(&mut self) {
        self.rollback_unless_closed();
    }
}
