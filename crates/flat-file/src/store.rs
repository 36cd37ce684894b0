// flat-file/src/store.rs

//! One logical append-only stream split across numbered files.
//!
//! Files are named `{store}-{number:09}.fdb` and hold back-to-back records:
//!
//! ```text
//! [4 bytes: payload length][payload][4 bytes: CRC-32C of length + payload]
//! ```
//!
//! Lock order, outermost first: open-file cache, its recency list, write
//! cursor, per-file lock. No path takes an earlier lock while holding a
//! later one.

use crate::location::{CHECKSUM_SIZE, LENGTH_PREFIX_SIZE, RECORD_OVERHEAD};
use crate::{
    FlatFileError, FlatFileLocation, FlatFileResult, LockableFile, LruCache, RollbackOutcome,
    RollbackWarning,
};
use crc::{Crc, CRC_32_ISCSI};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// CRC-32C (Castagnoli)
const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// File name extension of flat files
const FILE_EXTENSION: &str = "fdb";

/// Digits in the zero-padded file number
const FILE_NUMBER_DIGITS: usize = 9;

/// Times a read resolves its file again after finding it closed underneath
const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// Flat-file store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatFileConfig {
    /// Maximum size of a single flat file in bytes
    pub max_file_size: u32,
    /// Maximum number of read handles kept open, excluding the write file
    pub max_open_files: usize,
}

impl Default for FlatFileConfig {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024, // 512 MiB
            max_open_files: 25,
        }
    }
}

/// The single append point of a store
struct WriteCursor {
    file_number: u32,
    offset: u32,
    file: Arc<LockableFile>,
}

impl WriteCursor {
    fn location(&self) -> FlatFileLocation {
        FlatFileLocation::new(self.file_number, self.offset, 0)
    }
}

/// Append-only record store over numbered, size-capped files
pub struct FlatFileStore {
    base_path: PathBuf,
    store_name: String,
    config: FlatFileConfig,
    /// Read-only handles for files before the write file
    open_files: RwLock<LruCache<u32, Arc<LockableFile>>>,
    write_cursor: RwLock<WriteCursor>,
}

impl FlatFileStore {
    /// Open a store, positioning the write cursor at the end of its
    /// highest-numbered file
    pub fn open(
        base_path: impl AsRef<Path>,
        store_name: &str,
        config: FlatFileConfig,
    ) -> FlatFileResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let (file_number, file_length) = scan_flat_files(&base_path, store_name)?;
        let offset = u32::try_from(file_length).map_err(|_| {
            FlatFileError::Corruption(format!(
                "flat file {} of store {} is {} bytes, larger than any valid file",
                file_number, store_name, file_length
            ))
        })?;

        let file = open_write_file(&flat_file_path(&base_path, store_name, file_number))?;

        tracing::debug!(
            "Opened flat-file store {} at file {}, offset {}",
            store_name,
            file_number,
            offset
        );

        Ok(Self {
            open_files: RwLock::new(LruCache::new(config.max_open_files)),
            write_cursor: RwLock::new(WriteCursor {
                file_number,
                offset,
                file: Arc::new(LockableFile::new(file_number, file)),
            }),
            base_path,
            store_name: store_name.to_string(),
            config,
        })
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn config(&self) -> &FlatFileConfig {
        &self.config
    }

    /// Current write position (data length is always 0)
    pub fn current_location(&self) -> FlatFileLocation {
        self.write_cursor.read().location()
    }

    /// Number of cached read handles currently open
    pub fn open_read_files(&self) -> usize {
        self.open_files.read().len()
    }

    // ==================== WRITE ====================

    /// Append a record, moving to the next file first if it would not fit
    /// in the current one. The record is on disk when this returns.
    pub fn write(&self, data: &[u8]) -> FlatFileResult<FlatFileLocation> {
        let record_size = u64::from(RECORD_OVERHEAD) + data.len() as u64;
        if record_size > u64::from(self.config.max_file_size) {
            return Err(FlatFileError::RecordTooLarge {
                size: record_size,
                max: self.config.max_file_size,
            });
        }
        // Bounded by max_file_size above
        let data_length = data.len() as u32;

        let mut cursor = self.write_cursor.write();

        if u64::from(cursor.offset) + record_size > u64::from(self.config.max_file_size) {
            self.rotate(&mut cursor)?;
        }

        let path = self.file_path(cursor.file_number);
        cursor.file.ensure_open(|| open_write_file(&path))?;

        let location = FlatFileLocation::new(cursor.file_number, cursor.offset, data_length);
        let record = encode_record(data);
        cursor.file.write_all_at(&record, u64::from(cursor.offset))?;

        cursor.offset += record.len() as u32;
        Ok(location)
    }

    /// Close the current write file and start the next one
    fn rotate(&self, cursor: &mut WriteCursor) -> FlatFileResult<()> {
        tracing::debug!(
            "Store {}: file {} is full at offset {}, moving to file {}",
            self.store_name,
            cursor.file_number,
            cursor.offset,
            cursor.file_number + 1
        );

        cursor.file.close()?;

        let next = cursor.file_number.checked_add(1).ok_or_else(|| {
            FlatFileError::Corruption(format!("store {} ran out of file numbers", self.store_name))
        })?;
        cursor.file_number = next;
        cursor.offset = 0;
        cursor.file = Arc::new(LockableFile::closed(next));

        // A failed open here is retried by the write path on its next call
        let file = open_write_file(&self.file_path(next))?;
        cursor.file = Arc::new(LockableFile::new(next, file));
        Ok(())
    }

    // ==================== READ ====================

    /// Read the payload of the record at `location`, verifying its checksum
    pub fn read(&self, location: &FlatFileLocation) -> FlatFileResult<Vec<u8>> {
        self.check_written(&self.write_cursor.read(), location)?;

        let mut record = vec![0u8; location.record_size() as usize];
        self.read_record(location, &mut record)?;
        decode_record(location, &record)
    }

    fn read_record(&self, location: &FlatFileLocation, buf: &mut [u8]) -> FlatFileResult<()> {
        let offset = u64::from(location.file_offset);

        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let file = self.resolve_file(location)?;
            match file.read_exact_at(buf, offset) {
                Some(Ok(())) => return Ok(()),
                Some(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(FlatFileError::Corruption(format!(
                        "record at {} in store {} extends past the end of its file",
                        location, self.store_name
                    )));
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    tracing::debug!(
                        "Store {}: file {} was closed during a read, resolving again",
                        self.store_name,
                        location.file_number
                    );
                }
            }
        }

        Err(FlatFileError::NotFound(format!(
            "file {} of store {} kept closing during the read",
            location.file_number, self.store_name
        )))
    }

    /// Find the open file holding `location`, opening it if needed
    fn resolve_file(&self, location: &FlatFileLocation) -> FlatFileResult<Arc<LockableFile>> {
        let file_number = location.file_number;

        // The write file serves its own reads
        {
            let cursor = self.write_cursor.read();
            self.check_written(&cursor, location)?;
            if file_number == cursor.file_number {
                let path = self.file_path(file_number);
                cursor.file.ensure_open(|| open_write_file(&path))?;
                return Ok(Arc::clone(&cursor.file));
            }
        }

        {
            let open_files = self.open_files.read();
            if let Some(file) = open_files.get(&file_number) {
                open_files.touch(&file_number);
                return Ok(Arc::clone(file));
            }
        }

        let mut open_files = self.open_files.write();

        // Another reader may have opened it while we waited
        if let Some(file) = open_files.get(&file_number) {
            open_files.touch(&file_number);
            return Ok(Arc::clone(file));
        }

        // A rollback may have moved the cursor back onto this file while the
        // cache lock was free. Never cache the write file.
        {
            let cursor = self.write_cursor.read();
            self.check_written(&cursor, location)?;
            if file_number == cursor.file_number {
                return Ok(Arc::clone(&cursor.file));
            }
        }

        // Make room first so at most `max_open_files` read handles are ever open
        if let Some((_, evicted)) = open_files.evict_if_full() {
            self.release_read_file(&evicted, file_number);
        }

        let file = Arc::new(LockableFile::new(file_number, self.open_read_file(file_number)?));
        if let Some((_, evicted)) = open_files.insert_evicting_if_full(file_number, Arc::clone(&file)) {
            self.release_read_file(&evicted, file_number);
        }

        Ok(file)
    }

    // Waits for readers still using the evicted handle
    fn release_read_file(&self, evicted: &LockableFile, opening: u32) {
        evicted.discard();
        tracing::trace!(
            "Store {}: closed file {} to open file {}",
            self.store_name,
            evicted.file_number(),
            opening
        );
    }

    /// Reject locations that lie past the write cursor
    fn check_written(&self, cursor: &WriteCursor, location: &FlatFileLocation) -> FlatFileResult<()> {
        let beyond = location.file_number > cursor.file_number
            || (location.file_number == cursor.file_number
                && location.end_offset() > u64::from(cursor.offset));

        if beyond {
            return Err(FlatFileError::NotFound(format!(
                "record at {} is past the write cursor of store {} (file {}, offset {})",
                location, self.store_name, cursor.file_number, cursor.offset
            )));
        }
        Ok(())
    }

    fn open_read_file(&self, file_number: u32) -> FlatFileResult<File> {
        let path = self.file_path(file_number);
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                FlatFileError::NotFound(format!("flat file {} does not exist", path.display()))
            } else {
                FlatFileError::Io(e)
            }
        })
    }

    // ==================== ROLLBACK ====================

    /// Move the write cursor back to `target`, discarding everything after it.
    ///
    /// Deletes files after the target file and truncates the target file.
    /// I/O failures along the way do not stop the rollback: they are logged,
    /// collected in the returned outcome, and the cursor is repositioned
    /// anyway. A target ahead of the cursor is corruption.
    pub fn rollback(&self, target: &FlatFileLocation) -> FlatFileResult<RollbackOutcome> {
        let mut open_files = self.open_files.write();
        let mut cursor = self.write_cursor.write();

        let current = cursor.location();
        if target.same_position(&current) {
            return Ok(RollbackOutcome::Completed);
        }

        if target.is_after(&current) {
            tracing::error!(
                "Store {}: rollback target (file {}, offset {}) is ahead of the write cursor (file {}, offset {})",
                self.store_name,
                target.file_number,
                target.file_offset,
                cursor.file_number,
                cursor.offset
            );
            return Err(FlatFileError::Corruption(format!(
                "rollback target (file {}, offset {}) of store {} is ahead of the write cursor (file {}, offset {})",
                target.file_number, target.file_offset, self.store_name, cursor.file_number, cursor.offset
            )));
        }

        tracing::warn!(
            "ROLLBACK: store {} from file {}, offset {} to file {}, offset {}",
            self.store_name,
            cursor.file_number,
            cursor.offset,
            target.file_number,
            target.file_offset
        );

        let mut warnings = Vec::new();

        // Cached handles at or after the target file must not survive: those
        // files are deleted, or become the write file again.
        for (_, file) in open_files.remove_if(|number| *number >= target.file_number) {
            file.discard();
        }

        if cursor.file_number > target.file_number {
            if let Err(e) = cursor.file.close() {
                self.warn(
                    &mut warnings,
                    RollbackWarning::CloseFailed {
                        file_number: cursor.file_number,
                        reason: e.to_string(),
                    },
                );
            }

            for file_number in (target.file_number + 1..=cursor.file_number).rev() {
                let path = self.file_path(file_number);
                match fs::remove_file(&path) {
                    Ok(()) => tracing::debug!("Deleted flat file {}", path.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => self.warn(
                        &mut warnings,
                        RollbackWarning::DeleteFailed {
                            file_number,
                            reason: e.to_string(),
                        },
                    ),
                }
            }

            cursor.file = Arc::new(LockableFile::closed(target.file_number));
        }

        // The target file may be closed: by the branch above, or by `close`
        let path = self.file_path(target.file_number);
        match cursor.file.ensure_open(|| open_write_file(&path)) {
            Ok(()) => {
                if let Err(e) = cursor.file.truncate(u64::from(target.file_offset)) {
                    self.warn(
                        &mut warnings,
                        RollbackWarning::TruncateFailed {
                            file_number: target.file_number,
                            reason: e.to_string(),
                        },
                    );
                }
            }
            Err(e) => self.warn(
                &mut warnings,
                RollbackWarning::ReopenFailed {
                    file_number: target.file_number,
                    reason: e.to_string(),
                },
            ),
        }

        cursor.file_number = target.file_number;
        cursor.offset = target.file_offset;

        Ok(RollbackOutcome::from_warnings(warnings))
    }

    fn warn(&self, warnings: &mut Vec<RollbackWarning>, warning: RollbackWarning) {
        tracing::warn!("ROLLBACK: store {}: {}", self.store_name, warning);
        warnings.push(warning);
    }

    // ==================== LIFECYCLE ====================

    /// Sync the write file and close every open handle.
    ///
    /// The store stays usable: later writes and reads reopen what they need.
    pub fn close(&self) -> FlatFileResult<()> {
        let mut open_files = self.open_files.write();
        let cursor = self.write_cursor.write();

        for (_, file) in open_files.drain() {
            file.discard();
        }
        cursor.file.close()?;

        tracing::debug!("Closed flat-file store {}", self.store_name);
        Ok(())
    }

    fn file_path(&self, file_number: u32) -> PathBuf {
        flat_file_path(&self.base_path, &self.store_name, file_number)
    }
}

/// Path of file `file_number` of `store_name`
pub fn flat_file_path(base_path: &Path, store_name: &str, file_number: u32) -> PathBuf {
    base_path.join(format!(
        "{}-{:0width$}.{}",
        store_name,
        file_number,
        FILE_EXTENSION,
        width = FILE_NUMBER_DIGITS
    ))
}

/// Parse the file number out of a flat file name belonging to `store_name`
fn parse_file_number(file_name: &str, store_name: &str) -> Option<u32> {
    let number = file_name
        .strip_prefix(store_name)?
        .strip_prefix('-')?
        .strip_suffix(FILE_EXTENSION)?
        .strip_suffix('.')?;

    if number.len() != FILE_NUMBER_DIGITS || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok()
}

/// Highest file number of the store and that file's length, or `(0, 0)`
fn scan_flat_files(base_path: &Path, store_name: &str) -> FlatFileResult<(u32, u64)> {
    let mut last: Option<(u32, u64)> = None;

    for entry in fs::read_dir(base_path)? {
        let entry = entry?;
        let Some(file_number) = entry.file_name().to_str().and_then(|name| parse_file_number(name, store_name))
        else {
            continue;
        };

        if last.map_or(true, |(highest, _)| file_number > highest) {
            last = Some((file_number, entry.metadata()?.len()));
        }
    }

    Ok(last.unwrap_or((0, 0)))
}

fn open_write_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).create(true).open(path)
}

/// Frame `data` as length prefix, payload and checksum
fn encode_record(data: &[u8]) -> Vec<u8> {
    let length = (data.len() as u32).to_le_bytes();

    let mut digest = CASTAGNOLI.digest();
    digest.update(&length);
    digest.update(data);
    let checksum = digest.finalize();

    let mut record = Vec::with_capacity(data.len() + RECORD_OVERHEAD as usize);
    record.extend_from_slice(&length);
    record.extend_from_slice(data);
    record.extend_from_slice(&checksum.to_le_bytes());
    record
}

/// Verify a framed record and return its payload
fn decode_record(location: &FlatFileLocation, record: &[u8]) -> FlatFileResult<Vec<u8>> {
    let prefix = LENGTH_PREFIX_SIZE as usize;
    let trailer_start = record.len() - CHECKSUM_SIZE as usize;

    let stored_length = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
    if stored_length != location.data_length {
        return Err(FlatFileError::Corruption(format!(
            "record at {} has length prefix {}",
            location, stored_length
        )));
    }

    let stored_checksum = u32::from_le_bytes([
        record[trailer_start],
        record[trailer_start + 1],
        record[trailer_start + 2],
        record[trailer_start + 3],
    ]);
    let checksum = CASTAGNOLI.checksum(&record[..trailer_start]);
    if checksum != stored_checksum {
        return Err(FlatFileError::Corruption(format!(
            "checksum mismatch for record at {}: stored {:#010x}, computed {:#010x}",
            location, stored_checksum, checksum
        )));
    }

    Ok(record[prefix..trailer_start].to_vec())
}
