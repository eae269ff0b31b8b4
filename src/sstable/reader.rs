use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::iterator::{CellIterator, Table};
use crate::sstable::format::{decode_stamp, read_i32, read_i64, Footer, INT_SIZE, LONG_SIZE};
use crate::types::{Cell, Timestamp, Value};

/// An opened segment file. Supports seeks and ascending scans.
///
/// On open only the footer is read. Offsets, keys and values are read on
/// demand, one positioned read each, so opening is O(1) regardless of size.
pub struct Segment {
    /// Path to the segment file (for debugging/error messages).
    path: PathBuf,
    rows: Arc<Rows>,
}

/// Row access shared between a segment and its live iterators.
struct Rows {
    /// `None` once the segment has been closed.
    file: Mutex<Option<File>>,
    /// Size of the row region; the offset array starts here.
    data_size: u64,
    row_count: u32,
}

impl Segment {
    /// Open a segment file.
    ///
    /// Reads the row count from the last 4 bytes and derives the size of
    /// the row region from it. Fails with `Corruption` when the file is
    /// shorter than the footer or the count does not fit the file.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{}: file too short to contain footer ({file_size} bytes)",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(file_size - Footer::SIZE as u64))?;
        let mut footer_buf = [0u8; Footer::SIZE];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;
        let data_size = footer.data_size(file_size)?;

        Ok(Segment {
            path: path.to_path_buf(),
            rows: Arc::new(Rows {
                file: Mutex::new(Some(file)),
                data_size,
                row_count: footer.row_count,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of rows (tombstones included).
    pub fn len(&self) -> usize {
        self.rows.row_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.rows.row_count == 0
    }

    /// Iterate rows starting at the first key >= `from`.
    pub fn iter(&self, from: &[u8]) -> Result<SegmentIter> {
        let position = self.rows.search(from)?;
        Ok(SegmentIter {
            rows: Arc::clone(&self.rows),
            position,
        })
    }

    /// Largest timestamp stored in this segment, 0 if it is empty.
    /// Reads the timestamp field of every row.
    pub fn max_timestamp(&self) -> Result<Timestamp> {
        let mut max = 0;
        for row in 0..self.rows.row_count {
            let offset = self.rows.offset(row)?;
            let key_len = self.rows.key_len(offset)?;
            let stamp = self.rows.stamp(offset + (INT_SIZE + key_len) as u64)?;
            max = max.max(decode_stamp(stamp)?.0);
        }
        Ok(max)
    }
}

impl Table for Segment {
    fn iter_from(&self, from: &[u8]) -> Result<CellIterator> {
        Ok(Box::new(self.iter(from)?))
    }

    fn upsert(&self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(Error::Unsupported("upsert on an immutable segment"))
    }

    fn remove(&self, _key: &[u8]) -> Result<()> {
        Err(Error::Unsupported("remove on an immutable segment"))
    }

    /// Rows plus offset array plus footer, i.e. the file size.
    fn size_in_bytes(&self) -> u64 {
        self.rows.data_size + (self.rows.row_count as u64 + 1) * INT_SIZE as u64
    }

    /// Release the file handle. Later reads fail with `Error::Closed`.
    fn close(&self) -> Result<()> {
        self.rows.file.lock().take();
        Ok(())
    }
}

impl Rows {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(Error::Closed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Start of row `row`, validated against the row region.
    fn offset(&self, row: u32) -> Result<u64> {
        let mut buf = [0u8; INT_SIZE];
        self.read_at(self.data_size + row as u64 * INT_SIZE as u64, &mut buf)?;
        let raw = read_i32(&buf, "offset")?;
        match u64::try_from(raw) {
            Ok(offset) if offset < self.data_size => Ok(offset),
            _ => Err(Error::Corruption(format!(
                "offset {raw} of row {row} outside data region of {} bytes",
                self.data_size
            ))),
        }
    }

    /// End of row `row`: the next row's start, or the end of the region.
    fn row_end(&self, row: u32) -> Result<u64> {
        if row + 1 == self.row_count {
            Ok(self.data_size)
        } else {
            self.offset(row + 1)
        }
    }

    /// Key length of the row at `offset`, checked so that the key and the
    /// timestamp that follows both fit the row region.
    fn key_len(&self, offset: u64) -> Result<usize> {
        let mut buf = [0u8; INT_SIZE];
        self.read_at(offset, &mut buf)?;
        let raw = read_i32(&buf, "key length")?;
        let fits = u64::try_from(raw).is_ok_and(|len| {
            offset + (INT_SIZE + LONG_SIZE) as u64 + len <= self.data_size
        });
        if !fits {
            return Err(Error::Corruption(format!(
                "key length {raw} at offset {offset} overruns data region"
            )));
        }
        Ok(raw as usize)
    }

    fn stamp(&self, offset: u64) -> Result<i64> {
        let mut buf = [0u8; LONG_SIZE];
        self.read_at(offset, &mut buf)?;
        read_i64(&buf, "timestamp")
    }

    fn key(&self, row: u32) -> Result<Bytes> {
        let offset = self.offset(row)?;
        let key_len = self.key_len(offset)?;
        let mut key = vec![0u8; key_len];
        self.read_at(offset + INT_SIZE as u64, &mut key)?;
        Ok(Bytes::from(key))
    }

    /// Decode row `row` into a cell.
    fn cell(&self, row: u32) -> Result<Cell> {
        let offset = self.offset(row)?;
        let key_len = self.key_len(offset)?;
        let mut key = vec![0u8; key_len];
        self.read_at(offset + INT_SIZE as u64, &mut key)?;

        let stamp_at = offset + (INT_SIZE + key_len) as u64;
        let (timestamp, tombstone) = decode_stamp(self.stamp(stamp_at)?)?;
        if tombstone {
            return Ok(Cell::new(Bytes::from(key), Value::tombstone(timestamp)));
        }

        let value_at = stamp_at + LONG_SIZE as u64;
        let end = self.row_end(row)?;
        if end < value_at {
            return Err(Error::Corruption(format!(
                "row {row} ends at {end} before its value starts at {value_at}"
            )));
        }
        let mut data = vec![0u8; (end - value_at) as usize];
        self.read_at(value_at, &mut data)?;
        Ok(Cell::new(
            Bytes::from(key),
            Value::live(Bytes::from(data), timestamp),
        ))
    }

    /// Lowest row whose key is >= `from`; `row_count` if there is none.
    ///
    /// Binary search over decoded keys: each probe costs one offset read
    /// and one key read.
    fn search(&self, from: &[u8]) -> Result<u32> {
        let mut left = 0u32;
        let mut right = self.row_count;
        while left < right {
            let mid = left + (right - left) / 2;
            let key = self.key(mid)?;
            match key.as_ref().cmp(from) {
                std::cmp::Ordering::Less => left = mid + 1,
                std::cmp::Ordering::Greater => right = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Ok(left)
    }
}

/// Ascending iterator over segment rows, decoding one row per step.
///
/// Holds a shared handle on the segment's file, so it outlives the borrow
/// of the `Segment` that created it. Stops after the first error.
pub struct SegmentIter {
    rows: Arc<Rows>,
    position: u32,
}

impl Iterator for SegmentIter {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.rows.row_count {
            return None;
        }
        let row = self.position;
        self.position += 1;
        let cell = self.rows.cell(row);
        if cell.is_err() {
            self.position = self.rows.row_count;
        }
        Some(cell)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.rows.row_count.saturating_sub(self.position) as usize;
        (0, Some(left))
    }
}
