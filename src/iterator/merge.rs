use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Error, Result};
use crate::iterator::CellIterator;
use crate::types::Cell;

/// Head cell of one source, as stored in the heap.
struct HeapEntry {
    cell: Cell,
    /// Position of the source in the input vector. Lower = newer.
    source: usize,
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap: reverse so the smallest key, then the newest
    // timestamp, then the newest source pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.cell
            .merge_order(&other.cell)
            .then_with(|| self.source.cmp(&other.source))
            .reverse()
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Merges multiple sorted cell streams into a single sorted stream.
///
/// Ordering guarantee: cells come out by key ascending; equal keys come out
/// newest timestamp first, and on equal timestamps the source that appears
/// earlier in the input wins. Sources are passed newest first (memtable,
/// then segments from the highest generation down), so the first cell of
/// each key is always its latest version.
///
/// Duplicates are NOT removed here; see `CollapseEqualKeys`.
///
/// An error from any source is yielded once and ends the stream.
pub struct MergeIterator {
    sources: Vec<CellIterator>,
    heap: BinaryHeap<HeapEntry>,
    pending_error: Option<Error>,
}

impl MergeIterator {
    /// Build the initial heap from the head of every source.
    pub fn new(mut sources: Vec<CellIterator>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, iter) in sources.iter_mut().enumerate() {
            if let Some(cell) = iter.next() {
                heap.push(HeapEntry { cell: cell?, source });
            }
        }
        Ok(MergeIterator {
            sources,
            heap,
            pending_error: None,
        })
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            self.heap.clear();
            self.sources.clear();
            return Some(Err(e));
        }

        let HeapEntry { cell, source } = self.heap.pop()?;
        match self.sources[source].next() {
            Some(Ok(next)) => self.heap.push(HeapEntry { cell: next, source }),
            Some(Err(e)) => self.pending_error = Some(e),
            None => {}
        }
        Some(Ok(cell))
    }
}
