pub mod merge;

use crate::error::Result;
use crate::types::Cell;

pub use merge::MergeIterator;

/// A lazy, ascending, finite stream of cells read from one table.
///
/// Items are `Result`s because segment rows are decoded on demand and every
/// step can hit the disk.
pub type CellIterator = Box<dyn Iterator<Item = Result<Cell>> + Send>;

/// The central table abstraction for the storage engine.
///
/// Both the mutable memtable and immutable on-disk segments implement this
/// trait, so the read path can fan out over `Vec<Arc<dyn Table>>` without
/// caring where the cells live.
pub trait Table: Send + Sync {
    /// Cells with key >= `from`, ascending. Can be called any number of
    /// times; each call starts a fresh stream.
    fn iter_from(&self, from: &[u8]) -> Result<CellIterator>;

    /// Insert or replace the entry for `key`.
    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Record a deletion of `key`.
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Size of the table in segment-encoding bytes.
    fn size_in_bytes(&self) -> u64;

    /// Release the table's resources.
    fn close(&self) -> Result<()>;
}

/// Keeps only the first cell of each run of equal keys.
///
/// Fed from a `MergeIterator`, the first cell of a run is the most recent
/// version of that key, so this collapses the merged stream to one version
/// per key. Tombstones pass through; filtering them is the caller's job.
pub struct CollapseEqualKeys<I> {
    inner: I,
    last_key: Option<bytes::Bytes>,
}

impl<I> CollapseEqualKeys<I>
where
    I: Iterator<Item = Result<Cell>>,
{
    pub fn new(inner: I) -> Self {
        CollapseEqualKeys {
            inner,
            last_key: None,
        }
    }
}

impl<I> Iterator for CollapseEqualKeys<I>
where
    I: Iterator<Item = Result<Cell>>,
{
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let cell = match self.inner.next()? {
                Ok(cell) => cell,
                Err(e) => return Some(Err(e)),
            };
            if self.last_key.as_ref() == Some(&cell.key) {
                continue;
            }
            self.last_key = Some(cell.key.clone());
            return Some(Ok(cell));
        }
    }
}
