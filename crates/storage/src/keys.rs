// storage/src/keys.rs

//! Hierarchical keys.
//!
//! A bucket is a path of segments, each followed by `/`. A key is a bucket
//! path plus a raw suffix: bucket `["a", "b"]` with suffix `"k"` is stored
//! as `a/b/k`, so iterating the prefix `a/b/` visits exactly that bucket.

use std::fmt;

/// Byte appended after every bucket segment
pub const SEPARATOR: u8 = b'/';

/// Top-level bucket holding each flat-file store's committed write cursor
pub const FLAT_FILES_BUCKET: &[u8] = b"flat-files-cursors";

/// A bucket of keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Bucket {
    segments: Vec<Vec<u8>>,
}

impl Bucket {
    /// A top-level bucket
    pub fn new(segment: impl AsRef<[u8]>) -> Self {
        Self {
            segments: vec![segment.as_ref().to_vec()],
        }
    }

    /// The root bucket: keys directly under it carry no prefix
    pub fn root() -> Self {
        Self::default()
    }

    /// A bucket nested inside this one
    pub fn bucket(&self, segment: impl AsRef<[u8]>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.as_ref().to_vec());
        Self { segments }
    }

    /// A key inside this bucket
    pub fn key(&self, suffix: impl AsRef<[u8]>) -> Key {
        Key {
            bucket: self.clone(),
            suffix: suffix.as_ref().to_vec(),
        }
    }

    /// The full prefix shared by every key in this bucket
    pub fn path(&self) -> Vec<u8> {
        let len = self.segments.iter().map(|s| s.len() + 1).sum();
        let mut path = Vec::with_capacity(len);
        for segment in &self.segments {
            path.extend_from_slice(segment);
            path.push(SEPARATOR);
        }
        path
    }
}

/// A key: a bucket plus a suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    bucket: Bucket,
    suffix: Vec<u8>,
}

impl Key {
    /// The full stored key
    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = self.bucket.path();
        bytes.extend_from_slice(&self.suffix);
        bytes
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn suffix(&self) -> &[u8] {
        &self.suffix
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            write!(f, "{}", String::from_utf8_lossy(&bytes))
        } else {
            write!(f, "0x{}", hex::encode(&bytes))
        }
    }
}

/// Bucket of committed flat-file cursors
pub fn flat_files_bucket() -> Bucket {
    Bucket::new(FLAT_FILES_BUCKET)
}

/// Key under which a store's committed cursor is recorded
pub fn flat_file_cursor_key(store_name: &str) -> Key {
    flat_files_bucket().key(store_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = Bucket::new("a").bucket("b").key("k");
        assert_eq!(key.bytes(), b"a/b/k");
        assert_eq!(key.bucket().path(), b"a/b/");
        assert_eq!(key.suffix(), b"k");
        assert_eq!(key.bucket(), &Bucket::new("a").bucket("b"));
    }

    #[test]
    fn test_root_bucket() {
        let key = Bucket::root().key("top");
        assert_eq!(key.bytes(), b"top");
        assert!(Bucket::root().path().is_empty());
    }

    #[test]
    fn test_sibling_buckets_do_not_share_prefix() {
        let blocks = Bucket::new("blocks").path();
        let block_headers = Bucket::new("blocks-headers").path();
        assert!(!block_headers.starts_with(&blocks));
    }

    #[test]
    fn test_display() {
        assert_eq!(Bucket::new("utxo").key("abc").to_string(), "utxo/abc");
        assert_eq!(Bucket::new("h").key([0u8, 255]).to_string(), "0x682f00ff");
    }

    #[test]
    fn test_flat_file_cursor_key() {
        assert_eq!(flat_file_cursor_key("blocks").bytes(), b"flat-files-cursors/blocks");
    }
}
