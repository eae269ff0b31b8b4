use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::iterator::{CellIterator, Table};
use crate::types::{encoded_len, Cell, Clock, Value};

/// In-memory sorted buffer for writes. Wraps a lock-free skip map.
///
/// Every write goes here first. When size reaches the threshold, the engine
/// serializes the whole table into a segment and installs a fresh memtable.
///
/// Deletes are handled via tombstones. You can't just remove the key because
/// older versions may exist in segments on disk.
///
/// A key holds exactly one version here: later writes replace earlier ones.
pub struct MemTable {
    data: Arc<SkipMap<Bytes, Value>>,
    /// Sum of `encoded_len` over current entries.
    size: AtomicU64,
    /// Serializes the lookup, insert and size update of a write so the
    /// replaced entry is subtracted exactly once.
    write_lock: Mutex<()>,
    clock: Arc<Clock>,
}

impl MemTable {
    /// Create a new empty memtable stamping writes from `clock`.
    pub fn new(clock: Arc<Clock>) -> Self {
        MemTable {
            data: Arc::new(SkipMap::new()),
            size: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            clock,
        }
    }

    /// Insert a pre-stamped value, replacing any previous version of `key`.
    pub fn insert(&self, key: Bytes, value: Value) {
        let added = encoded_len(&key, &value) as u64;
        let _guard = self.write_lock.lock();
        let replaced = self
            .data
            .get(&key)
            .map_or(0, |entry| encoded_len(entry.key(), entry.value()) as u64);

        self.data.insert(key, value);
        let size = self.size.load(Ordering::SeqCst);
        self.size.store(size + added - replaced, Ordering::SeqCst);
    }

    /// Look up the stored version of a key, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Number of entries (tombstones included).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current footprint in segment-encoding bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    /// Sorted iterator over entries with key >= `from`, tombstones included.
    pub fn iter(&self, from: &[u8]) -> MemTableIter {
        MemTableIter {
            data: Arc::clone(&self.data),
            lower: Bound::Included(Bytes::copy_from_slice(from)),
        }
    }
}

impl Table for MemTable {
    fn iter_from(&self, from: &[u8]) -> Result<CellIterator> {
        Ok(Box::new(self.iter(from)))
    }

    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let value = Value::live(Bytes::copy_from_slice(value), self.clock.tick());
        self.insert(Bytes::copy_from_slice(key), value);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        let value = Value::tombstone(self.clock.tick());
        self.insert(Bytes::copy_from_slice(key), value);
        Ok(())
    }

    fn size_in_bytes(&self) -> u64 {
        self.size()
    }

    /// Drop all entries and reset the size to zero.
    fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.data.clear();
        self.size.store(0, Ordering::SeqCst);
        Ok(())
    }
}

/// Ascending cursor over a memtable.
///
/// Holds its own handle on the map and re-seeks past the last returned key
/// on every step, so it is `'static` and sees concurrent inserts of keys
/// it has not reached yet.
pub struct MemTableIter {
    data: Arc<SkipMap<Bytes, Value>>,
    lower: Bound<Bytes>,
}

impl Iterator for MemTableIter {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        let bound = self.lower.as_ref().map(|k: &Bytes| &k[..]);
        let entry = self.data.lower_bound(bound)?;
        let key = entry.key().clone();
        let value = entry.value().clone();
        self.lower = Bound::Excluded(key.clone());
        Some(Ok(Cell::new(key, value)))
    }
}
