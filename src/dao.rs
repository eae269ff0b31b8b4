//! The key-value boundary callers program against.
//!
//! `KvStore` is what a server or CLI layer holds. Two implementations:
//! the persistent `DB` and `MemoryStore`, a plain ordered map with no
//! flushing, no files and no merge, kept as a reference and fallback.

use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::error::Result;

/// A live key/value pair as returned by scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

impl Record {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Record { key, value }
    }
}

/// Ascending, single-pass stream of live records.
pub type Records = Box<dyn Iterator<Item = Result<Record>> + Send>;

pub trait KvStore: Send + Sync {
    /// Live records with key >= `from`, ascending, one per key.
    fn scan(&self, from: &[u8]) -> Result<Records>;

    /// Current value of `key`, if present and not removed.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.scan(key)?.next() {
            Some(Ok(record)) if record.key.as_ref() == key => Ok(Some(record.value)),
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }

    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn remove(&self, key: &[u8]) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Non-persistent store over a single ordered map.
///
/// Removal is physical; `close` drops everything.
#[derive(Default)]
pub struct MemoryStore {
    map: Arc<SkipMap<Bytes, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn scan(&self, from: &[u8]) -> Result<Records> {
        Ok(Box::new(MemoryScan {
            map: Arc::clone(&self.map),
            lower: Bound::Included(Bytes::copy_from_slice(from)),
        }))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.map.get(key).map(|entry| entry.value().clone()))
    }

    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map
            .insert(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }
}

struct MemoryScan {
    map: Arc<SkipMap<Bytes, Bytes>>,
    lower: Bound<Bytes>,
}

impl Iterator for MemoryScan {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let bound = self.lower.as_ref().map(|k: &Bytes| &k[..]);
        let entry = self.map.lower_bound(bound)?;
        let record = Record::new(entry.key().clone(), entry.value().clone());
        self.lower = Bound::Excluded(record.key.clone());
        Some(Ok(record))
    }
}
