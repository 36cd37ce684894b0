// storage/src/transaction.rs

use crate::keys::flat_file_cursor_key;
use crate::writers::{StoreWriters, WriterPermit};
use crate::{Bucket, Cursor, Key, KvTransaction, StorageError, StorageResult};
use flat_file::{FlatFileDatabase, RollbackOutcome};
use std::collections::HashMap;

/// A transaction spanning the metadata store and the flat-file stores.
///
/// Flat-file appends are durable as soon as `append_to_store` returns and are
/// not undone by `rollback`. Each append stages the store's new write cursor
/// in the batch, so `commit` is what makes the appended data reachable after
/// a restart; uncommitted appends are cut off by the repair run at open.
///
/// The first append to a store claims that store until the transaction
/// commits or rolls back. Another transaction appending to the same store
/// blocks until then, so committed cursors never move backwards.
pub struct Transaction<'db> {
    kv: KvTransaction<'db>,
    flat_files: &'db FlatFileDatabase,
    writers: &'db StoreWriters,
    permits: HashMap<String, WriterPermit<'db>>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(
        kv: KvTransaction<'db>,
        flat_files: &'db FlatFileDatabase,
        writers: &'db StoreWriters,
    ) -> Self {
        Self {
            kv,
            flat_files,
            writers,
            permits: HashMap::new(),
        }
    }

    pub fn put(&mut self, key: &Key, value: &[u8]) -> StorageResult<()> {
        self.kv.put(key, value)
    }

    pub fn get(&self, key: &Key) -> StorageResult<Vec<u8>> {
        self.kv.get(key)
    }

    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        self.kv.has(key)
    }

    pub fn delete(&mut self, key: &Key) -> StorageResult<()> {
        self.kv.delete(key)
    }

    pub fn cursor(&self, bucket: &Bucket) -> StorageResult<Cursor<'_>> {
        self.kv.cursor(bucket)
    }

    /// Append `data` to a flat-file store, returning its serialized location.
    ///
    /// Waits while another open transaction holds the store. A thread must
    /// not append to a store through two transactions at once.
    pub fn append_to_store(&mut self, store_name: &str, data: &[u8]) -> StorageResult<Vec<u8>> {
        self.kv.check_open("append in")?;
        self.claim(store_name);

        let kv = &mut self.kv;
        append_to_store(self.flat_files, store_name, data, |key, current| {
            kv.put(key, current)
        })
    }

    pub fn retrieve_from_store(&self, store_name: &str, location: &[u8]) -> StorageResult<Vec<u8>> {
        self.kv.check_open("read in")?;
        Ok(self.flat_files.read(store_name, location)?)
    }

    /// Serialized write cursor of a flat-file store
    pub fn current_flat_data_location(&self, store_name: &str) -> StorageResult<Vec<u8>> {
        self.kv.check_open("read in")?;
        Ok(self.flat_files.current_location(store_name)?)
    }

    /// Undo flat-file appends back to `location`. Not done automatically by
    /// `rollback`.
    pub fn rollback_flat_data(
        &mut self,
        store_name: &str,
        location: &[u8],
    ) -> StorageResult<RollbackOutcome> {
        self.kv.check_open("roll back flat data in")?;
        self.claim(store_name);
        Ok(self.flat_files.rollback(store_name, location)?)
    }

    pub fn commit(&mut self) -> StorageResult<()> {
        let result = self.kv.commit();
        // Released only once the staged cursors are durable
        self.permits.clear();
        result
    }

    pub fn rollback(&mut self) -> StorageResult<()> {
        let result = self.kv.rollback();
        self.permits.clear();
        result
    }

    pub fn rollback_unless_closed(&mut self) {
        self.kv.rollback_unless_closed();
        self.permits.clear();
    }

    fn claim(&mut self, store_name: &str) {
        if !self.permits.contains_key(store_name) {
            let permit = self.writers.acquire(store_name);
            self.permits.insert(store_name.to_string(), permit);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.kv.is_closed()
    }
}

/// Write `data` to a store and hand its new write cursor to `record_cursor`.
/// If either step fails the store is rolled back to where it was.
pub(crate) fn append_to_store<F>(
    flat_files: &FlatFileDatabase,
    store_name: &str,
    data: &[u8],
    record_cursor: F,
) -> StorageResult<Vec<u8>>
where
    F: FnOnce(&Key, &[u8]) -> StorageResult<()>,
{
    let previous = flat_files.current_location(store_name)?;

    let result = flat_files
        .write(store_name, data)
        .map_err(StorageError::from)
        .and_then(|location| {
            let current = flat_files.current_location(store_name)?;
            record_cursor(&flat_file_cursor_key(store_name), &current)?;
            Ok(location)
        });

    if let Err(e) = &result {
        tracing::warn!("Append to store {} failed, rolling back: {}", store_name, e);
        match flat_files.rollback(store_name, &previous) {
            Ok(outcome) => {
                for warning in outcome.warnings() {
                    tracing::warn!("Rollback of store {}: {}", store_name, warning);
                }
            }
            Err(rollback_err) => {
                tracing::error!(
                    "Failed to roll back store {} after failed append: {}",
                    store_name,
                    rollback_err
                );
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DatabaseConfig};
    use flat_file::{FlatFileConfig, FlatFileLocation};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(DatabaseConfig::with_path(temp_dir.path())).unwrap();
        (db, temp_dir)
    }

    #[test]
    fn test_append_stages_cursor() {
        let (db, _temp) = create_test_db();
        let cursor_key = flat_file_cursor_key("blocks");

        let mut tx = db.begin().unwrap();
        let location = tx.append_to_store("blocks", b"block").unwrap();
        assert_eq!(tx.retrieve_from_store("blocks", &location).unwrap(), b"block");

        // Staged, not yet committed
        assert!(!db.has(&cursor_key).unwrap());

        let current = tx.current_flat_data_location("blocks").unwrap();
        tx.commit().unwrap();

        assert_eq!(db.get(&cursor_key).unwrap(), current);
        assert_eq!(
            FlatFileLocation::decode(&current).unwrap(),
            FlatFileLocation::new(0, 13, 0)
        );
    }

    #[test]
    fn test_rollback_keeps_flat_data() {
        let (db, _temp) = create_test_db();

        let mut tx = db.begin().unwrap();
        let location = tx.append_to_store("blocks", b"block").unwrap();
        tx.rollback().unwrap();

        // Durable until the next repair
        assert_eq!(db.retrieve_from_store("blocks", &location).unwrap(), b"block");
        assert!(!db.has(&flat_file_cursor_key("blocks")).unwrap());
    }

    #[test]
    fn test_manual_flat_data_rollback() {
        let (db, _temp) = create_test_db();

        let mut tx = db.begin().unwrap();
        let checkpoint = tx.current_flat_data_location("blocks").unwrap();
        let location = tx.append_to_store("blocks", b"aborted").unwrap();

        assert!(tx.rollback_flat_data("blocks", &checkpoint).unwrap().is_clean());
        assert_eq!(tx.current_flat_data_location("blocks").unwrap(), checkpoint);
        assert!(tx.retrieve_from_store("blocks", &location).unwrap_err().is_not_found());
        tx.rollback().unwrap();
    }

    #[test]
    fn test_failed_append_leaves_store_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            flat_file: FlatFileConfig {
                max_file_size: 64,
                ..FlatFileConfig::default()
            },
            ..DatabaseConfig::with_path(temp_dir.path())
        };
        let db = Database::open(config).unwrap();

        let mut tx = db.begin().unwrap();
        let before = tx.current_flat_data_location("blocks").unwrap();

        let err = tx.append_to_store("blocks", &[0u8; 100]).unwrap_err();
        assert!(matches!(
            err,
            StorageError::FlatFile(flat_file::FlatFileError::RecordTooLarge { .. })
        ));
        assert_eq!(tx.current_flat_data_location("blocks").unwrap(), before);
        assert_eq!(tx.kv.pending_writes(), 0);
    }

    #[test]
    fn test_failed_cursor_record_rolls_back_write() {
        let temp_dir = TempDir::new().unwrap();
        let flat_files = FlatFileDatabase::new(temp_dir.path(), FlatFileConfig::default());
        flat_files.write("blocks", b"committed").unwrap();

        let before = flat_files.current_location("blocks").unwrap();
        let err = append_to_store(&flat_files, "blocks", b"data", |_, _| {
            Err(StorageError::DatabaseError("batch rejected".into()))
        })
        .unwrap_err();

        assert!(matches!(err, StorageError::DatabaseError(_)));
        assert_eq!(flat_files.current_location("blocks").unwrap(), before);
    }

    #[test]
    fn test_second_appender_waits_for_commit() {
        let (db, _temp) = create_test_db();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let mut first = db.begin().unwrap();
            first.append_to_store("blocks", b"first").unwrap();

            scope.spawn(|| {
                let mut second = db.begin().unwrap();
                second.append_to_store("blocks", b"second").unwrap();
                second.commit().unwrap();
                done.store(true, Ordering::SeqCst);
            });

            std::thread::sleep(Duration::from_millis(100));
            assert!(!done.load(Ordering::SeqCst));
            first.commit().unwrap();
        });

        // The later append committed last, so the recorded cursor is the newest
        assert_eq!(
            db.get(&flat_file_cursor_key("blocks")).unwrap(),
            db.flat_files().current_location("blocks").unwrap()
        );
    }

    #[test]
    fn test_store_released_on_rollback_and_drop() {
        let (db, _temp) = create_test_db();

        let mut tx = db.begin().unwrap();
        tx.append_to_store("blocks", b"a").unwrap();
        tx.rollback().unwrap();
        db.append_to_store("blocks", b"b").unwrap();

        {
            let mut tx = db.begin().unwrap();
            tx.append_to_store("blocks", b"c").unwrap();
        }
        db.append_to_store("blocks", b"d").unwrap();

        // Other stores are never held up
        let mut tx = db.begin().unwrap();
        tx.append_to_store("blocks", b"e").unwrap();
        db.append_to_store("headers", b"h").unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_closed_transaction() {
        let (db, _temp) = create_test_db();

        let mut tx = db.begin().unwrap();
        tx.commit().unwrap();

        assert!(tx.append_to_store("blocks", b"x").unwrap_err().is_closed_resource());
        assert!(tx.retrieve_from_store("blocks", &[0u8; 12]).unwrap_err().is_closed_resource());
        assert!(tx.current_flat_data_location("blocks").unwrap_err().is_closed_resource());
        assert!(tx.rollback_flat_data("blocks", &[0u8; 12]).unwrap_err().is_closed_resource());
        assert!(tx.put(&Bucket::new("a").key("b"), b"c").unwrap_err().is_closed_resource());
        tx.rollback_unless_closed();
        assert!(tx.is_closed());
    }
}
