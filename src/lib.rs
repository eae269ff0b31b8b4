//! # LSM key-value store
//!
//! An embedded key-value store using the Log-Structured Merge design.
//!
//! ## Core idea
//! Writes land in an in-memory sorted memtable. When it grows past a
//! threshold it is written out whole as an immutable, sorted, binary
//! segment file and a fresh memtable takes over. Reads merge the memtable
//! with every segment, newest first, so the latest write of each key wins
//! and tombstones hide what they deleted.
//!
//! Segments are never merged with each other.

pub mod dao;
pub mod db;
pub mod error;
pub mod iterator;
pub mod memtable;
pub mod sstable;
pub mod types;

// Public re-exports for the top-level API
pub use dao::{KvStore, MemoryStore, Record, Records};
pub use db::{DB, Options, Scan, Stats};
pub use error::{Error, Result};
