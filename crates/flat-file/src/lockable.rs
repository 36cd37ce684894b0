// flat-file/src/lockable.rs

//! A file handle paired with the reader-writer lock that guards it.
//!
//! The handle never leaves this type: every read, write, truncate and close
//! runs inside the lock, so a handle cannot be used after another thread has
//! closed it. Reads take the lock in shared mode and use positional I/O, so
//! any number of readers can work on the same file at once. Closing takes the
//! lock exclusively and therefore waits for in-flight readers to finish.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::fs::File;
use std::io;

use parking_lot::RwLock;

/// An open (or closed) flat file guarded by its own reader-writer lock
#[derive(Debug)]
pub struct LockableFile {
    file_number: u32,
    file: RwLock<Option<File>>,
}

impl LockableFile {
    pub fn new(file_number: u32, file: File) -> Self {
        Self {
            file_number,
            file: RwLock::new(Some(file)),
        }
    }

    /// A placeholder for a file that is not currently open
    pub fn closed(file_number: u32) -> Self {
        Self {
            file_number,
            file: RwLock::new(None),
        }
    }

    pub fn file_number(&self) -> u32 {
        self.file_number
    }

    pub fn is_open(&self) -> bool {
        self.file.read().is_some()
    }

    /// Read exactly `buf.len()` bytes at `offset` under the shared lock.
    ///
    /// Returns `None` when the file has been closed, so the caller can
    /// resolve the file again instead of touching a dead handle.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Option<io::Result<()>> {
        let guard = self.file.read();
        guard.as_ref().map(|file| read_exact_at_offset(file, buf, offset))
    }

    /// Open the file with `open` unless it is already open
    pub fn ensure_open<F>(&self, open: F) -> io::Result<()>
    where
        F: FnOnce() -> io::Result<File>,
    {
        let mut guard = self.file.write();
        if guard.is_none() {
            *guard = Some(open()?);
        }
        Ok(())
    }

    /// Write all of `data` at `offset` and flush it to disk.
    ///
    /// Runs under the exclusive lock so readers of this file are finished
    /// and blocked before any bytes land.
    pub fn write_all_at(&self, data: &[u8], offset: u64) -> io::Result<()> {
        let guard = self.file.write();
        let file = guard.as_ref().ok_or_else(|| closed_error(self.file_number))?;
        write_all_at_offset(file, data, offset)?;
        file.sync_data()
    }

    /// Truncate to `len` bytes and sync
    pub fn truncate(&self, len: u64) -> io::Result<()> {
        let guard = self.file.write();
        let file = guard.as_ref().ok_or_else(|| closed_error(self.file_number))?;
        file.set_len(len)?;
        file.sync_all()
    }

    /// Sync and release the handle. Closing an already closed file is a no-op.
    pub fn close(&self) -> io::Result<()> {
        let mut guard = self.file.write();
        match guard.take() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }

    /// Release the handle without syncing (read-only handles)
    pub fn discard(&self) {
        self.file.write().take();
    }
}

fn closed_error(file_number: u32) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("flat file {} is not open", file_number),
    )
}

#[cfg(unix)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected end of file during seek_read",
            ));
        }
        pos += n;
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        pos += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_rw(dir: &TempDir) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.path().join("lockable.fdb"))
            .unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let file = LockableFile::new(0, open_rw(&dir));

        file.write_all_at(b"hello world", 0).unwrap();
        file.write_all_at(b"WORLD", 6).unwrap();

        let mut buf = [0u8; 11];
        file.read_exact_at(&mut buf, 0).unwrap().unwrap();
        assert_eq!(&buf, b"hello WORLD");
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = TempDir::new().unwrap();
        let file = LockableFile::new(0, open_rw(&dir));
        file.write_all_at(b"abc", 0).unwrap();

        let mut buf = [0u8; 8];
        let err = file.read_exact_at(&mut buf, 0).unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_closed_file_is_not_used() {
        let dir = TempDir::new().unwrap();
        let file = LockableFile::new(3, open_rw(&dir));
        assert!(file.is_open());

        file.close().unwrap();
        assert!(!file.is_open());

        let mut buf = [0u8; 1];
        assert!(file.read_exact_at(&mut buf, 0).is_none());
        assert!(file.write_all_at(b"x", 0).is_err());

        // Closing twice is fine
        file.close().unwrap();
    }

    #[test]
    fn test_ensure_open_reopens() {
        let dir = TempDir::new().unwrap();
        let file = LockableFile::closed(0);

        file.ensure_open(|| Ok(open_rw(&dir))).unwrap();
        assert!(file.is_open());

        // Already open: the opener is not invoked
        file.ensure_open(|| Err(io::Error::new(io::ErrorKind::Other, "unused"))).unwrap();
    }

    #[test]
    fn test_truncate() {
        let dir = TempDir::new().unwrap();
        let file = LockableFile::new(0, open_rw(&dir));
        file.write_all_at(b"0123456789", 0).unwrap();

        file.truncate(4).unwrap();

        let len = std::fs::metadata(dir.path().join("lockable.fdb")).unwrap().len();
        assert_eq!(len, 4);
    }

    #[test]
    fn test_concurrent_readers() {
        let dir = TempDir::new().unwrap();
        let file = Arc::new(LockableFile::new(0, open_rw(&dir)));
        file.write_all_at(&[7u8; 4096], 0).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let file = Arc::clone(&file);
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        let mut buf = [0u8; 16];
                        file.read_exact_at(&mut buf, i * 16).unwrap().unwrap();
                        assert_eq!(buf, [7u8; 16]);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
