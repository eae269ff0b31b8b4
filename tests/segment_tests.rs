// Segment tests: serialization round trip and seek behaviour.

use bytes::Bytes;
use lsmkv::iterator::Table;
use lsmkv::sstable::{write_segment, Segment, SegmentBuilder};
use lsmkv::types::{Cell, Value};
use tempfile::tempdir;

fn cells(n: u32) -> Vec<Cell> {
    (0..n)
        .map(|i| {
            let key = Bytes::from(format!("key_{:05}", i * 2));
            let ts = u64::from(i) + 1;
            let value = if i % 7 == 3 {
                Value::tombstone(ts)
            } else {
                Value::live(Bytes::from(format!("val_{i}_{}", "x".repeat((i % 13) as usize))), ts)
            };
            Cell::new(key, value)
        })
        .collect()
}

fn build(path: &std::path::Path, cells: &[Cell]) -> Segment {
    let mut builder = SegmentBuilder::new(path).unwrap();
    for cell in cells {
        builder.add(cell).unwrap();
    }
    builder.finish().unwrap();
    Segment::open(path).unwrap()
}

fn first_key(segment: &Segment, from: &[u8]) -> Option<Bytes> {
    segment.iter(from).unwrap().next().map(|c| c.unwrap().key)
}

// =============================================================================
// Test 1: Write 500 cells, read them back in order with every field intact
// =============================================================================
#[test]
fn round_trip_preserves_cells() {
    let dir = tempdir().unwrap();
    let written = cells(500);
    let segment = build(&dir.path().join("0.dat"), &written);

    let read: Vec<Cell> = segment.iter(b"").unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(read, written);
    assert_eq!(segment.max_timestamp().unwrap(), 500);
}

// =============================================================================
// Test 2: Every stored key is found exactly
// =============================================================================
#[test]
fn seek_to_stored_key_starts_there() {
    let dir = tempdir().unwrap();
    let written = cells(257);
    let segment = build(&dir.path().join("0.dat"), &written);

    for (i, cell) in written.iter().enumerate() {
        let mut iter = segment.iter(&cell.key).unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), *cell, "seek to {i}");
        assert_eq!(iter.count(), written.len() - i - 1);
    }
}

// =============================================================================
// Test 3: Keys between stored keys land on the next greater one
// =============================================================================
#[test]
fn seek_between_keys_finds_successor() {
    let dir = tempdir().unwrap();
    let written = cells(100);
    let segment = build(&dir.path().join("0.dat"), &written);

    // Stored keys are key_00000, key_00002, ...; odd numbers fall between.
    for i in 0..99u32 {
        let probe = format!("key_{:05}", i * 2 + 1);
        let expected = format!("key_{:05}", i * 2 + 2);
        assert_eq!(
            first_key(&segment, probe.as_bytes()),
            Some(Bytes::from(expected)),
            "probe {probe}"
        );
    }
    // Before the first key.
    assert_eq!(first_key(&segment, b"a"), Some(Bytes::from_static(b"key_00000")));
    assert_eq!(first_key(&segment, b""), Some(Bytes::from_static(b"key_00000")));
}

// =============================================================================
// Test 4: Past the last key → empty
// =============================================================================
#[test]
fn seek_past_end_is_empty() {
    let dir = tempdir().unwrap();
    let segment = build(&dir.path().join("0.dat"), &cells(10));
    assert_eq!(first_key(&segment, b"key_00019"), None);
    assert_eq!(first_key(&segment, b"zzz"), None);
    assert_eq!(first_key(&segment, b"key_00018"), Some(Bytes::from_static(b"key_00018")));
}

// =============================================================================
// Test 5: Iteration is restartable
// =============================================================================
#[test]
fn iter_from_can_be_called_again() {
    let dir = tempdir().unwrap();
    let segment = build(&dir.path().join("0.dat"), &cells(20));

    let first: Vec<Cell> = segment.iter_from(b"key_00010").unwrap().map(|c| c.unwrap()).collect();
    let second: Vec<Cell> = segment.iter_from(b"key_00010").unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 15);
}

// =============================================================================
// Test 6: Single-row segments
// =============================================================================
#[test]
fn single_row_segment() {
    let dir = tempdir().unwrap();
    let only = Cell::new(
        Bytes::from_static(b"only"),
        Value::live(Bytes::from_static(b"value"), 42),
    );
    let segment = build(&dir.path().join("0.dat"), std::slice::from_ref(&only));

    assert_eq!(first_key(&segment, b"a"), Some(Bytes::from_static(b"only")));
    assert_eq!(first_key(&segment, b"only"), Some(Bytes::from_static(b"only")));
    assert_eq!(first_key(&segment, b"onlz"), None);
    assert_eq!(segment.iter(b"").unwrap().next().unwrap().unwrap(), only);
}

// =============================================================================
// Test 7: write_segment output opens and reads back
// =============================================================================
#[test]
fn write_segment_produces_readable_file() {
    let dir = tempdir().unwrap();
    let tmp = dir.path().join("0.tmp");
    let dst = dir.path().join("0.dat");
    let written = cells(50);

    let meta = write_segment(&tmp, &dst, written.iter().cloned().map(Ok)).unwrap();
    let segment = Segment::open(&dst).unwrap();

    assert_eq!(meta.row_count, 50);
    assert_eq!(segment.size_in_bytes(), meta.file_size);
    let read: Vec<Cell> = segment.iter(b"").unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(read, written);
}

// =============================================================================
// Test 8: Large values spanning many rows
// =============================================================================
#[test]
fn large_values_round_trip() {
    let dir = tempdir().unwrap();
    let written: Vec<Cell> = (0..20u8)
        .map(|i| {
            Cell::new(
                Bytes::from(vec![b'k', i]),
                Value::live(Bytes::from(vec![i; 64 * 1024]), u64::from(i) + 1),
            )
        })
        .collect();
    let segment = build(&dir.path().join("0.dat"), &written);

    let read: Vec<Cell> = segment.iter(&[b'k', 10]).unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(read, written[10..]);
}
