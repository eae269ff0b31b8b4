//! Bit-exact layout of a segment file.
//!
//! ```text
//! ┌────────┬────────┬─────┬──────────┬──────────┬─────┬──────────────┐
//! │ Row 0  │ Row 1  │ ... │ Off 0(4B)│ Off 1(4B)│ ... │ RowCount(4B) │
//! └────────┴────────┴─────┴──────────┴──────────┴─────┴──────────────┘
//!
//! Row: [key_len(4B)][key][stamp(8B)][value, only if stamp > 0]
//! ```
//!
//! All integers are big-endian and signed. `stamp` is the write timestamp,
//! negated for tombstones. Offsets are absolute file positions of each row,
//! in row order. A live row's value runs up to the next row's offset, or to
//! the end of the data region for the last row.

use crate::error::{Error, Result};
use crate::types::{Cell, MAX_TIMESTAMP, Timestamp, Value};

/// Width of `key_len`, of each offset and of the row count.
pub const INT_SIZE: usize = 4;
/// Width of the timestamp field.
pub const LONG_SIZE: usize = 8;
/// Largest data region whose offsets fit the int32 fields.
pub const MAX_DATA_SIZE: u64 = i32::MAX as u64;

/// The trailing row count, plus the region sizes it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub row_count: u32,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = INT_SIZE;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        (self.row_count as i32).to_be_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let raw = read_i32(data, "footer")?;
        let row_count = u32::try_from(raw)
            .map_err(|_| Error::Corruption(format!("negative row count {raw}")))?;
        Ok(Footer { row_count })
    }

    /// Size of the offset array.
    pub fn index_size(&self) -> u64 {
        self.row_count as u64 * INT_SIZE as u64
    }

    /// Size of the row region of a file of `file_size` bytes ending with
    /// this footer: `file_size - 4 - row_count * 4`.
    pub fn data_size(&self, file_size: u64) -> Result<u64> {
        file_size
            .checked_sub(Self::SIZE as u64)
            .and_then(|rest| rest.checked_sub(self.index_size()))
            .ok_or_else(|| {
                Error::Corruption(format!(
                    "row count {} does not fit a {file_size} byte file",
                    self.row_count
                ))
            })
    }
}

/// On-disk timestamp field for `value`: negated for tombstones.
pub fn encode_stamp(value: &Value) -> i64 {
    let ts = value.timestamp().min(MAX_TIMESTAMP) as i64;
    if value.is_tombstone() { -ts } else { ts }
}

/// Split a stored timestamp field into `(timestamp, is_tombstone)`.
pub fn decode_stamp(stamp: i64) -> Result<(Timestamp, bool)> {
    match stamp {
        0 | i64::MIN => Err(Error::Corruption(format!("invalid timestamp field {stamp}"))),
        s if s < 0 => Ok((s.unsigned_abs(), true)),
        s => Ok((s as Timestamp, false)),
    }
}

/// Append the row encoding of `cell` to `buf`.
pub fn encode_row(cell: &Cell, buf: &mut Vec<u8>) {
    buf.reserve(cell.encoded_len());
    buf.extend_from_slice(&(cell.key.len() as i32).to_be_bytes());
    buf.extend_from_slice(&cell.key);
    buf.extend_from_slice(&encode_stamp(&cell.value).to_be_bytes());
    if !cell.value.is_tombstone() {
        buf.extend_from_slice(cell.value.data());
    }
}

pub fn read_i32(data: &[u8], what: &str) -> Result<i32> {
    data.get(..INT_SIZE)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_be_bytes)
        .ok_or_else(|| Error::Corruption(format!("{what} truncated")))
}

pub fn read_i64(data: &[u8], what: &str) -> Result<i64> {
    data.get(..LONG_SIZE)
        .and_then(|b| b.try_into().ok())
        .map(i64::from_be_bytes)
        .ok_or_else(|| Error::Corruption(format!("{what} truncated")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn live_row_layout() {
        let cell = Cell::new(Bytes::from_static(b"ab"), Value::live(Bytes::from_static(b"xyz"), 5));
        let mut buf = Vec::new();
        encode_row(&cell, &mut buf);
        assert_eq!(
            buf,
            vec![0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0, 0, 0, 0, 5, b'x', b'y', b'z']
        );
        assert_eq!(buf.len(), cell.encoded_len());
    }

    #[test]
    fn tombstone_row_negates_timestamp_and_drops_value() {
        let cell = Cell::new(Bytes::from_static(b"k"), Value::tombstone(1));
        let mut buf = Vec::new();
        encode_row(&cell, &mut buf);
        assert_eq!(buf, vec![0, 0, 0, 1, b'k', 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(buf.len(), cell.encoded_len());
    }

    #[test]
    fn stamp_sign_carries_tombstone_flag() {
        assert_eq!(decode_stamp(42).unwrap(), (42, false));
        assert_eq!(decode_stamp(-42).unwrap(), (42, true));
        assert_eq!(encode_stamp(&Value::tombstone(7)), -7);
        assert_eq!(encode_stamp(&Value::live(Bytes::new(), 7)), 7);
    }

    #[test]
    fn zero_stamp_is_corruption() {
        assert!(matches!(decode_stamp(0), Err(Error::Corruption(_))));
        assert!(matches!(decode_stamp(i64::MIN), Err(Error::Corruption(_))));
    }

    #[test]
    fn footer_is_big_endian() {
        let footer = Footer { row_count: 258 };
        assert_eq!(footer.encode(), [0, 0, 1, 2]);
        assert_eq!(Footer::decode(&[0, 0, 1, 2]).unwrap(), footer);
    }

    #[test]
    fn footer_rejects_negative_count() {
        assert!(matches!(Footer::decode(&[0xff, 0, 0, 0]), Err(Error::Corruption(_))));
    }

    #[test]
    fn footer_too_short() {
        assert!(Footer::decode(&[0u8; 2]).is_err());
    }

    #[test]
    fn data_size_subtracts_index_and_footer() {
        let footer = Footer { row_count: 3 };
        assert_eq!(footer.data_size(100).unwrap(), 100 - 4 - 12);
        assert!(matches!(footer.data_size(10), Err(Error::Corruption(_))));
    }
}
