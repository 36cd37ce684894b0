// storage/src/cursor.rs

use crate::{Bucket, Key, StorageError, StorageResult};
use rocksdb::{DBIteratorWithThreadMode, Direction, IteratorMode, DB};

type Entry = (Box<[u8]>, Box<[u8]>);

/// Forward cursor over the keys of one bucket, in ascending byte order.
///
/// A cursor starts before the first key: call `next` (or `first`) before
/// reading `key`/`value`. It reads either the live store or a
/// transaction's snapshot, whichever created it.
pub struct Cursor<'a> {
    iter: DBIteratorWithThreadMode<'a, DB>,
    bucket: Bucket,
    prefix: Vec<u8>,
    current: Option<Entry>,
    // Entry already pulled from the iterator by a missed `seek`
    pending: Option<Entry>,
    closed: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(iter: DBIteratorWithThreadMode<'a, DB>, bucket: Bucket) -> Self {
        let prefix = bucket.path();
        Self {
            iter,
            bucket,
            prefix,
            current: None,
            pending: None,
            closed: false,
        }
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Advance to the next key, returning false once the bucket is exhausted
    pub fn next(&mut self) -> StorageResult<bool> {
        self.check_open()?;

        let entry = match self.pending.take() {
            Some(entry) => Some(entry),
            None => self.pull()?,
        };
        self.current = entry;
        Ok(self.current.is_some())
    }

    /// Move to the first key of the bucket, returning false if it is empty
    pub fn first(&mut self) -> StorageResult<bool> {
        self.check_open()?;

        self.iter
            .set_mode(IteratorMode::From(&self.prefix, Direction::Forward));
        self.pending = None;
        self.next()
    }

    /// Position on exactly `key`. On `NotFound` the cursor is left before
    /// the first key greater than `key`.
    pub fn seek(&mut self, key: &Key) -> StorageResult<()> {
        self.check_open()?;

        let target = key.bytes();
        if !target.starts_with(&self.prefix) {
            return Err(StorageError::Format(format!(
                "key {} is outside the cursor's bucket",
                key
            )));
        }

        self.iter
            .set_mode(IteratorMode::From(&target, Direction::Forward));
        self.current = None;
        self.pending = None;

        match self.pull()? {
            Some(entry) if *entry.0 == target[..] => {
                self.current = Some(entry);
                Ok(())
            }
            other => {
                self.pending = other;
                Err(StorageError::NotFound(format!("key {}", key)))
            }
        }
    }

    /// Key at the current position, relative to the cursor's bucket
    pub fn key(&self) -> StorageResult<Key> {
        let (key, _) = self.entry()?;
        Ok(self.bucket.key(&key[self.prefix.len()..]))
    }

    pub fn value(&self) -> StorageResult<Vec<u8>> {
        let (_, value) = self.entry()?;
        Ok(value.to_vec())
    }

    pub fn close(&mut self) -> StorageResult<()> {
        self.check_open()?;
        self.closed = true;
        self.current = None;
        self.pending = None;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn entry(&self) -> StorageResult<&Entry> {
        self.check_open()?;
        self.current
            .as_ref()
            .ok_or_else(|| StorageError::NotFound("cursor is not positioned on a key".into()))
    }

    // Next entry from the iterator, or None once it leaves the bucket
    fn pull(&mut self) -> StorageResult<Option<Entry>> {
        match self.iter.next() {
            Some(Ok((key, value))) if key.starts_with(&self.prefix) => Ok(Some((key, value))),
            Some(Ok(_)) | None => Ok(None),
            Some(Err(e)) => Err(StorageError::DatabaseError(e.to_string())),
        }
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::ClosedResource("cursor is closed".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Bucket, DatabaseConfig, KvStore};
    use tempfile::TempDir;

    fn create_test_store() -> (KvStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig::with_path(temp_dir.path());
        let store = KvStore::open(temp_dir.path().join("metadata"), &config).unwrap();
        (store, temp_dir)
    }

    fn fill(store: &KvStore) {
        let blocks = Bucket::new("blocks");
        for suffix in ["c", "a", "b"] {
            store.put(&blocks.key(suffix), suffix.as_bytes()).unwrap();
        }
        // Neighbours that must stay out of the "blocks/" scan
        store.put(&Bucket::new("blocka").key("x"), b"x").unwrap();
        store.put(&Bucket::new("blocks-index").key("y"), b"y").unwrap();
        store.put(&Bucket::new("blocks").bucket("sub").key("z"), b"z").unwrap();
    }

    #[test]
    fn test_iterates_bucket_in_order() {
        let (store, _temp) = create_test_store();
        fill(&store);

        let mut cursor = store.cursor(&Bucket::new("blocks")).unwrap();
        let mut keys = Vec::new();
        while cursor.next().unwrap() {
            keys.push(cursor.key().unwrap().suffix().to_vec());
            assert_eq!(cursor.key().unwrap().bucket(), &Bucket::new("blocks"));
        }

        assert_eq!(
            keys,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"sub/z".to_vec()]
        );
        assert!(!cursor.next().unwrap());
    }

    #[test]
    fn test_sub_bucket() {
        let (store, _temp) = create_test_store();
        fill(&store);

        let mut cursor = store.cursor(&Bucket::new("blocks").bucket("sub")).unwrap();
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.key().unwrap().suffix(), b"z");
        assert_eq!(cursor.value().unwrap(), b"z");
        assert!(!cursor.next().unwrap());
    }

    #[test]
    fn test_empty_bucket() {
        let (store, _temp) = create_test_store();
        fill(&store);

        let mut cursor = store.cursor(&Bucket::new("empty")).unwrap();
        assert!(!cursor.next().unwrap());
        assert!(!cursor.first().unwrap());
        assert!(cursor.key().unwrap_err().is_not_found());
    }

    #[test]
    fn test_accessors_before_next() {
        let (store, _temp) = create_test_store();
        fill(&store);

        let cursor = store.cursor(&Bucket::new("blocks")).unwrap();
        assert!(cursor.key().is_err());
        assert!(cursor.value().is_err());
    }

    #[test]
    fn test_first_rewinds() {
        let (store, _temp) = create_test_store();
        fill(&store);

        let mut cursor = store.cursor(&Bucket::new("blocks")).unwrap();
        while cursor.next().unwrap() {}

        assert!(cursor.first().unwrap());
        assert_eq!(cursor.key().unwrap().suffix(), b"a");
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.key().unwrap().suffix(), b"b");
    }

    #[test]
    fn test_seek() {
        let (store, _temp) = create_test_store();
        fill(&store);
        let blocks = Bucket::new("blocks");

        let mut cursor = store.cursor(&blocks).unwrap();
        cursor.seek(&blocks.key("b")).unwrap();
        assert_eq!(cursor.value().unwrap(), b"b");
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.key().unwrap().suffix(), b"c");

        // Missing key leaves the cursor before the next greater key
        let err = cursor.seek(&blocks.key("bb")).unwrap_err();
        assert!(err.is_not_found());
        assert!(cursor.key().is_err());
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.key().unwrap().suffix(), b"c");

        let err = cursor.seek(&Bucket::new("blocka").key("x")).unwrap_err();
        assert!(matches!(err, crate::StorageError::Format(_)));
    }

    #[test]
    fn test_closed_cursor() {
        let (store, _temp) = create_test_store();
        fill(&store);

        let mut cursor = store.cursor(&Bucket::new("blocks")).unwrap();
        assert!(cursor.next().unwrap());
        cursor.close().unwrap();

        assert!(cursor.is_closed());
        assert!(cursor.next().unwrap_err().is_closed_resource());
        assert!(cursor.key().unwrap_err().is_closed_resource());
        assert!(cursor.value().unwrap_err().is_closed_resource());
        assert!(cursor.first().unwrap_err().is_closed_resource());
        assert!(cursor.close().unwrap_err().is_closed_resource());
    }
}
