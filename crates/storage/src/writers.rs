// storage/src/writers.rs

//! One appending transaction per flat-file store.
//!
//! An append stages the store's write cursor in its transaction, and the
//! last commit wins. Two transactions appending to the same store could
//! commit out of order and record an older cursor than the data on disk
//! that was committed, which repair would then cut off. A transaction
//! therefore holds a store's permit from its first append until it commits
//! or rolls back. Other appenders to that store wait.

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;

#[derive(Default)]
pub(crate) struct StoreWriters {
    busy: Mutex<HashSet<String>>,
    released: Condvar,
}

impl StoreWriters {
    /// Wait until no one else appends to `store_name`, then claim it.
    ///
    /// Not reentrant: a thread already holding the permit for a store
    /// deadlocks if it asks again.
    pub(crate) fn acquire(&self, store_name: &str) -> WriterPermit<'_> {
        let mut busy = self.busy.lock();
        while busy.contains(store_name) {
            tracing::trace!("Waiting for the current appender to {}", store_name);
            self.released.wait(&mut busy);
        }
        busy.insert(store_name.to_string());

        WriterPermit {
            writers: self,
            store_name: store_name.to_string(),
        }
    }

    fn release(&self, store_name: &str) {
        self.busy.lock().remove(store_name);
        self.released.notify_all();
    }
}

/// Exclusive right to append to one store, released on drop
pub(crate) struct WriterPermit<'a> {
    writers: &'a StoreWriters,
    store_name: String,
}

impl Drop for WriterPermit<'_> {
    fn drop(&mut self) {
        self.writers.release(&self.store_name);
    }
}
