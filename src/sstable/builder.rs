use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::sstable::format::{encode_row, Footer, MAX_DATA_SIZE};
use crate::types::{Cell, Timestamp};

/// Summary of a finished segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMeta {
    /// Rows written (tombstones included).
    pub row_count: u32,
    /// Size of the row region.
    pub data_size: u64,
    /// Total file size: rows, offsets and footer.
    pub file_size: u64,
    /// Largest timestamp among the rows, 0 for an empty segment.
    pub max_timestamp: Timestamp,
}

/// Builds a segment file from a sorted stream of cells.
///
/// Build process:
/// 1. Add cells one by one (must be in ascending key order)
/// 2. Each row goes straight to the buffered writer; its start offset is kept
/// 3. finish() writes the offset array and the row count, then fsyncs
pub struct SegmentBuilder {
    writer: BufWriter<File>,
    /// Start offset of every row written so far.
    offsets: Vec<u32>,
    /// Current write position in the file.
    data_offset: u64,
    /// Reused row encoding buffer.
    row: Vec<u8>,
    last_key: Option<bytes::Bytes>,
    max_timestamp: Timestamp,
}

impl SegmentBuilder {
    /// Create a new segment builder that writes to the given path.
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(SegmentBuilder {
            writer: BufWriter::new(file),
            offsets: Vec::new(),
            data_offset: 0,
            row: Vec::new(),
            last_key: None,
            max_timestamp: 0,
        })
    }

    /// Append a row. MUST be called in strictly ascending key order.
    pub fn add(&mut self, cell: &Cell) -> Result<()> {
        debug_assert!(
            self.last_key.as_ref().is_none_or(|last| *last < cell.key),
            "cells must be added in strictly ascending key order"
        );

        self.row.clear();
        encode_row(cell, &mut self.row);

        let end = self.data_offset + self.row.len() as u64;
        if end > MAX_DATA_SIZE {
            return Err(Error::SegmentTooLarge(end));
        }

        self.writer.write_all(&self.row)?;
        self.offsets.push(self.data_offset as u32);
        self.data_offset = end;
        self.max_timestamp = self.max_timestamp.max(cell.value.timestamp());
        self.last_key = Some(cell.key.clone());
        Ok(())
    }

    /// Number of rows added so far.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Finalize the segment: offsets, row count, flush, fsync.
    pub fn finish(mut self) -> Result<SegmentMeta> {
        let mut index = Vec::with_capacity(self.offsets.len() * 4);
        for offset in &self.offsets {
            index.extend_from_slice(&(*offset as i32).to_be_bytes());
        }
        self.writer.write_all(&index)?;

        let footer = Footer {
            row_count: self.offsets.len() as u32,
        };
        self.writer.write_all(&footer.encode())?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(SegmentMeta {
            row_count: footer.row_count,
            data_size: self.data_offset,
            file_size: self.data_offset + footer.index_size() + Footer::SIZE as u64,
            max_timestamp: self.max_timestamp,
        })
    }
}

/// Serialize `cells` into `tmp`, then atomically rename it to `dst`.
///
/// A crash or error before the rename leaves nothing under `dst`; the
/// temporary file is removed on error and ignored by recovery otherwise.
pub fn write_segment<I>(tmp: &Path, dst: &Path, cells: I) -> Result<SegmentMeta>
where
    I: IntoIterator<Item = Result<Cell>>,
{
    let meta = match build(tmp, cells) {
        Ok(meta) => meta,
        Err(e) => {
            let _ = fs::remove_file(tmp);
            return Err(e);
        }
    };

    fs::rename(tmp, dst)?;
    sync_parent(dst)?;
    Ok(meta)
}

fn build<I>(path: &Path, cells: I) -> Result<SegmentMeta>
where
    I: IntoIterator<Item = Result<Cell>>,
{
    let mut builder = SegmentBuilder::new(path)?;
    for cell in cells {
        builder.add(&cell?)?;
    }
    builder.finish()
}

/// Persist the directory entry created by a rename.
#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}
