use std::fmt;
use std::io;

/// Unified error type for the storage engine.
#[derive(Debug)]
pub enum Error {
    /// IO error from disk operations (open, read, write, rename).
    Io(io::Error),
    /// The segment file does not match the on-disk layout (bad row count,
    /// offset or key length outside the data region).
    Corruption(String),
    /// A mutation was attempted on an immutable table.
    Unsupported(&'static str),
    /// Rejected configuration, reported before any I/O happens.
    InvalidOptions(String),
    /// A flush produced offsets that do not fit the int32 index fields.
    SegmentTooLarge(u64),
    /// The store, or the table's file handle, has already been closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Error::Unsupported(op) => write!(f, "Unsupported operation: {op}"),
            Error::InvalidOptions(msg) => write!(f, "Invalid options: {msg}"),
            Error::SegmentTooLarge(size) => {
                write!(f, "Segment too large: {size} bytes exceeds the int32 offset range")
            }
            Error::Closed => write!(f, "Table is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_and_expose_source() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("IO error"));
    }

    #[test]
    fn corruption_is_distinct_from_io() {
        let err = Error::Corruption("row count 7 does not fit 12 bytes".into());
        assert!(std::error::Error::source(&err).is_none());
        assert_eq!(err.to_string(), "Corruption: row count 7 does not fit 12 bytes");
    }
}
