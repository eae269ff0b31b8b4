//! Immutable on-disk sorted segments.
//!
//! A segment is written once by a flush (`builder`) and afterwards only
//! read (`reader`). `format` holds the byte layout both sides agree on.

pub mod builder;
pub mod format;
pub mod reader;

pub use builder::{write_segment, SegmentBuilder, SegmentMeta};
pub use reader::{Segment, SegmentIter};
