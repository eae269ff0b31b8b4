use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, RwLock};

use crate::dao::{KvStore, Record, Records};
use crate::error::{Error, Result};
use crate::iterator::{CellIterator, CollapseEqualKeys, MergeIterator, Table};
use crate::memtable::MemTable;
use crate::sstable::{write_segment, Segment};
use crate::types::Clock;

/// Extension of segment files: `<generation>.dat`.
pub const SEGMENT_SUFFIX: &str = "dat";
/// Extension of in-progress flushes: `<generation>.tmp`.
pub const TMP_SUFFIX: &str = "tmp";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Memtable size, in segment-encoding bytes, at which a write flushes it.
    /// Must be strictly positive.
    pub flush_threshold_bytes: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            flush_threshold_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Options {
    pub fn with_flush_threshold(mut self, bytes: u64) -> Self {
        self.flush_threshold_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold_bytes == 0 {
            return Err(Error::InvalidOptions(
                "flush_threshold_bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Registered segments.
    pub segments: usize,
    /// Footprint of the active memtable.
    pub memtable_bytes: u64,
    /// Entries in the active memtable, tombstones included.
    pub memtable_entries: usize,
    /// Generation the next flush will write.
    pub next_generation: u64,
    /// Flushes performed by this instance.
    pub flushes: u64,
}

/// The storage engine: one memtable plus every segment in a directory.
///
/// Writes go to the memtable; once its size reaches the flush threshold the
/// whole memtable becomes a new segment `<generation>.dat`. Reads merge the
/// memtable and all segments, newest first.
///
/// The directory scan at open is the only segment registry; there is no
/// manifest. Unflushed data is lost unless `close` (or `flush`) runs.
pub struct DB {
    dir: PathBuf,
    options: Options,
    clock: Arc<Clock>,
    /// Active memtable. Writers and readers take the shared side; a flush
    /// holds the exclusive side until the new segment is registered and a
    /// fresh memtable is installed.
    memtable: RwLock<Arc<MemTable>>,
    /// Generation -> segment. Iterated in reverse for newest-first reads.
    segments: SkipMap<u64, Arc<Segment>>,
    /// The flush lock. Owns the generation the next flush will write.
    next_generation: Mutex<u64>,
    flushes: AtomicU64,
    closed: AtomicBool,
}

impl DB {
    /// Open or create a store in `dir`.
    ///
    /// Registers every `<n>.dat` file as segment `n`, removes `<n>.tmp`
    /// leftovers from interrupted flushes, and ignores anything else.
    pub fn open(dir: impl AsRef<Path>, options: Options) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let segments: SkipMap<u64, Arc<Segment>> = SkipMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                continue;
            }
            match classify(&path) {
                Some(FileKind::Segment(generation)) => {
                    if let Some(existing) = segments.get(&generation) {
                        return Err(Error::Corruption(format!(
                            "{} and {} both claim generation {generation}",
                            existing.value().path().display(),
                            path.display()
                        )));
                    }
                    segments.insert(generation, Arc::new(Segment::open(&path)?));
                }
                Some(FileKind::Tmp(generation)) => {
                    tracing::warn!(
                        generation,
                        path = %path.display(),
                        "removing leftover flush file"
                    );
                    fs::remove_file(&path)?;
                }
                None => {
                    tracing::warn!(path = %path.display(), "skipping non-segment file");
                }
            }
        }

        let next_generation = segments.back().map_or(0, |e| *e.key() + 1);

        // Writes after a restart must outrank everything already on disk.
        let clock = Arc::new(Clock::new());
        if let Some(newest) = segments.back() {
            clock.observe(newest.value().max_timestamp()?);
        }

        tracing::info!(
            dir = %dir.display(),
            segments = segments.len(),
            next_generation,
            flush_threshold_bytes = options.flush_threshold_bytes,
            "opened store"
        );

        Ok(DB {
            memtable: RwLock::new(Arc::new(MemTable::new(Arc::clone(&clock)))),
            dir,
            options,
            clock,
            segments,
            next_generation: Mutex::new(next_generation),
            flushes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// `open` with only the flush threshold configured.
    pub fn open_with_threshold(dir: impl AsRef<Path>, flush_threshold_bytes: u64) -> Result<Self> {
        DB::open(dir, Options::default().with_flush_threshold(flush_threshold_bytes))
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Insert or replace `key`. Flushes before returning if the memtable
    /// reached the threshold.
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(|memtable| memtable.upsert(key, value))
    }

    /// Delete `key` by writing a tombstone. Same flush rule as `upsert`.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.write(|memtable| memtable.remove(key))
    }

    /// `closed` is checked under the memtable guard: `close` sets it while
    /// holding the exclusive side, so a write either lands before the final
    /// flush or fails.
    fn write(&self, op: impl FnOnce(&MemTable) -> Result<()>) -> Result<()> {
        let size = {
            let memtable = self.memtable.read();
            self.ensure_open()?;
            op(&**memtable)?;
            memtable.size_in_bytes()
        };
        if size >= self.options.flush_threshold_bytes {
            self.flush_if_full()?;
        }
        Ok(())
    }

    /// Re-check the threshold under the flush lock: a racing writer may
    /// have flushed this memtable already.
    fn flush_if_full(&self) -> Result<()> {
        let mut generation = self.next_generation.lock();
        let mut memtable = self.memtable.write();
        if self.closed.load(Ordering::SeqCst)
            || memtable.is_empty()
            || memtable.size_in_bytes() < self.options.flush_threshold_bytes
        {
            return Ok(());
        }
        self.flush_locked(&mut generation, &mut memtable)
    }

    /// Write the memtable out as a new segment now. No-op when it is empty.
    pub fn flush(&self) -> Result<()> {
        let mut generation = self.next_generation.lock();
        self.ensure_open()?;
        let mut memtable = self.memtable.write();
        if memtable.is_empty() {
            return Ok(());
        }
        self.flush_locked(&mut generation, &mut memtable)
    }

    /// Serialize to `<gen>.tmp`, rename to `<gen>.dat`, register, install
    /// an empty memtable. Caller holds the flush lock and the memtable
    /// write guard.
    ///
    /// Readers that took a snapshot of the old memtable keep iterating it;
    /// it is never cleared in place.
    fn flush_locked(&self, generation: &mut u64, memtable: &mut Arc<MemTable>) -> Result<()> {
        let current = *generation;
        let tmp = self.dir.join(format!("{current}.{TMP_SUFFIX}"));
        let dst = self.segment_path(current);

        let meta = write_segment(&tmp, &dst, memtable.iter(b""))?;
        *generation += 1;

        let segment = Segment::open(&dst)?;
        self.segments.insert(current, Arc::new(segment));
        *memtable = Arc::new(MemTable::new(Arc::clone(&self.clock)));
        self.flushes.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            generation = current,
            rows = meta.row_count,
            bytes = meta.file_size,
            "flushed memtable"
        );
        Ok(())
    }

    /// Live records with key >= `from`, ascending, newest version of each
    /// key, tombstoned keys omitted.
    ///
    /// The scan works on a snapshot of the memtable and segment set taken
    /// here; later flushes do not disturb it.
    pub fn scan(&self, from: &[u8]) -> Result<Scan> {
        Ok(Scan {
            cells: self.merged(from)?,
        })
    }

    /// Current value of `key`, if present and not removed.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.merged(key)?.next() {
            Some(Ok(cell)) if cell.key.as_ref() == key && !cell.value.is_tombstone() => {
                Ok(Some(cell.value.data().clone()))
            }
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }

    /// Memtable first, then segments from the newest generation down,
    /// merged and collapsed to one version per key. Tombstones included.
    fn merged(&self, from: &[u8]) -> Result<CollapseEqualKeys<MergeIterator>> {
        let (memtable, segments) = {
            let memtable = self.memtable.read();
            self.ensure_open()?;
            let segments: Vec<Arc<Segment>> = self
                .segments
                .iter()
                .rev()
                .map(|e| Arc::clone(e.value()))
                .collect();
            (Arc::clone(&*memtable), segments)
        };

        let mut sources: Vec<CellIterator> = Vec::with_capacity(segments.len() + 1);
        sources.push(memtable.iter_from(from)?);
        for segment in &segments {
            sources.push(segment.iter_from(from)?);
        }
        Ok(CollapseEqualKeys::new(MergeIterator::new(sources)?))
    }

    pub fn stats(&self) -> Stats {
        let memtable = Arc::clone(&*self.memtable.read());
        Stats {
            segments: self.segments.len(),
            memtable_bytes: memtable.size_in_bytes(),
            memtable_entries: memtable.len(),
            next_generation: *self.next_generation.lock(),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }

    /// Flush pending writes, then release every segment. Further calls
    /// fail with `Error::Closed`; a second `close` is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut generation = self.next_generation.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut memtable = self.memtable.write();
            if !memtable.is_empty() {
                self.flush_locked(&mut generation, &mut memtable)?;
            }
            self.closed.store(true, Ordering::SeqCst);
        }
        for entry in self.segments.iter() {
            entry.value().close()?;
        }
        tracing::info!(dir = %self.dir.display(), segments = self.segments.len(), "closed store");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn segment_path(&self, generation: u64) -> PathBuf {
        self.dir.join(format!("{generation}.{SEGMENT_SUFFIX}"))
    }
}

impl KvStore for DB {
    fn scan(&self, from: &[u8]) -> Result<Records> {
        Ok(Box::new(DB::scan(self, from)?))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        DB::get(self, key)
    }

    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        DB::upsert(self, key, value)
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        DB::remove(self, key)
    }

    fn close(&self) -> Result<()> {
        DB::close(self)
    }
}

/// Result of `DB::scan`: live records, ascending, lazily read.
pub struct Scan {
    cells: CollapseEqualKeys<MergeIterator>,
}

impl Iterator for Scan {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let cell = match self.cells.next()? {
                Ok(cell) => cell,
                Err(e) => return Some(Err(e)),
            };
            if cell.value.is_tombstone() {
                continue;
            }
            let value = cell.value.data().clone();
            return Some(Ok(Record::new(cell.key, value)));
        }
    }
}

enum FileKind {
    Segment(u64),
    Tmp(u64),
}

/// `<digits>.dat` is a segment and `<digits>.tmp` a leftover flush.
/// Anything else (letters, signs, empty stem, other extensions) is not ours.
fn classify(path: &Path) -> Option<FileKind> {
    let name = path.file_name()?.to_str()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let generation = stem.parse().ok()?;
    match ext {
        SEGMENT_SUFFIX => Some(FileKind::Segment(generation)),
        TMP_SUFFIX => Some(FileKind::Tmp(generation)),
        _ => None,
    }
}
