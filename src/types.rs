use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Raw key bytes. Compared lexicographically as unsigned bytes.
pub type Key = Bytes;

/// Logical write timestamp. Always strictly positive; the on-disk format
/// stores it in a signed 64-bit field and uses the sign as the tombstone bit.
pub type Timestamp = u64;

/// Largest timestamp the signed on-disk field can carry.
pub const MAX_TIMESTAMP: Timestamp = i64::MAX as u64;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone: the key stays, marked as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A normal put operation.
    Put = 0x01,
    /// A delete (tombstone marker).
    Delete = 0x02,
}

/// A value payload tagged with its write timestamp and kind.
///
/// Tombstones carry no data. They stay in the memtable and in segments so
/// that the merged read path can shadow older versions of the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    data: Bytes,
    timestamp: Timestamp,
    value_type: ValueType,
}

impl Value {
    /// A live value written at `timestamp`.
    pub fn live(data: Bytes, timestamp: Timestamp) -> Self {
        debug_assert!(timestamp > 0, "timestamps must be strictly positive");
        Value {
            data,
            timestamp,
            value_type: ValueType::Put,
        }
    }

    /// A deletion marker written at `timestamp`.
    pub fn tombstone(timestamp: Timestamp) -> Self {
        debug_assert!(timestamp > 0, "timestamps must be strictly positive");
        Value {
            data: Bytes::new(),
            timestamp,
            value_type: ValueType::Delete,
        }
    }

    /// The payload. Empty for tombstones.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn is_tombstone(&self) -> bool {
        self.value_type == ValueType::Delete
    }
}

/// A key together with one version of its value. The unit stored in tables
/// and compared during merges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: Key,
    pub value: Value,
}

impl Cell {
    pub fn new(key: Key, value: Value) -> Self {
        Cell { key, value }
    }

    /// Bytes this cell occupies as a segment row:
    /// `[key_len(4B)][key][timestamp(8B)][value if live]`.
    ///
    /// The memtable sums this figure so that its flush threshold is measured
    /// in the same unit as the data region of the segment it will produce.
    pub fn encoded_len(&self) -> usize {
        encoded_len(&self.key, &self.value)
    }

    /// Merge ordering: key ascending, then the more recent version first.
    pub fn merge_order(&self, other: &Cell) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.value.timestamp.cmp(&self.value.timestamp))
    }
}

/// Row footprint of `key` → `value` without building a `Cell`.
pub fn encoded_len(key: &[u8], value: &Value) -> usize {
    let data = if value.is_tombstone() { 0 } else { value.data.len() };
    4 + key.len() + 8 + data
}

/// Source of write timestamps.
///
/// Hybrid clock: each tick is the wall clock in nanoseconds, bumped to one
/// past the previous tick whenever the wall clock stalls or goes backwards.
/// Never returns zero.
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        Clock::default()
    }

    /// Produce a timestamp strictly greater than every previous tick and
    /// every observed timestamp.
    pub fn tick(&self) -> Timestamp {
        let now = wall_clock_nanos();
        let (Ok(prev) | Err(prev)) =
            self.last
                .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |last| {
                    Some(now.max(last + 1))
                });
        now.max(prev + 1)
    }

    /// Make sure future ticks land above `timestamp` (used after recovery).
    pub fn observe(&self, timestamp: Timestamp) {
        self.last.fetch_max(timestamp, AtomicOrdering::SeqCst);
    }
}

fn wall_clock_nanos() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(MAX_TIMESTAMP as u128) as Timestamp)
        .unwrap_or(0)
}
