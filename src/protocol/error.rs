//! Wire-level error types

use thiserror::Error;

/// Errors raised while encoding or decoding the wire format.
///
/// Every decode failure is a typed error; the codec never silently truncates
/// or zero-fills a value. Once the byte stream has produced one of these, it
/// can no longer be resynchronized and the connection must be torn down.
#[derive(Error, Debug)]
pub enum Error {
    /// Input ended before the declared value was complete
    #[error("truncated input: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required by the current value
        needed: usize,
        /// Bytes actually available
        got: usize,
    },

    /// Short string exceeds the one-byte length prefix
    #[error("short string too long: {len} bytes (max 255)")]
    ShortStringTooLong {
        /// Length of the offending string
        len: usize,
    },

    /// String bytes were not valid UTF-8
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Unrecognized field-value type tag
    #[error("unknown field type tag: {tag:#04x}")]
    UnknownFieldTag {
        /// The tag byte found on the wire
        tag: u8,
    },

    /// Unrecognized frame kind byte
    #[error("unknown frame kind: {kind:#04x}")]
    UnknownFrameKind {
        /// The kind byte found on the wire
        kind: u8,
    },

    /// Table entries did not consume exactly the declared byte length
    #[error("table length mismatch: declared {declared} bytes, consumed {consumed}")]
    TableLengthMismatch {
        /// Byte length from the table's length prefix
        declared: usize,
        /// Bytes actually consumed by the entries
        consumed: usize,
    },

    /// Array elements did not consume exactly the declared byte length
    #[error("array length mismatch: declared {declared} bytes, consumed {consumed}")]
    ArrayLengthMismatch {
        /// Byte length from the array's length prefix
        declared: usize,
        /// Bytes actually consumed by the elements
        consumed: usize,
    },

    /// Tables/arrays nested past the supported depth
    #[error("field nesting deeper than {max} levels")]
    NestingTooDeep {
        /// Maximum supported nesting depth
        max: usize,
    },

    /// Frame end marker was not the fixed sentinel
    #[error("bad frame end marker: expected {:#04x}, found {found:#04x}", super::FRAME_END)]
    BadFrameEnd {
        /// Byte found where the sentinel was expected
        found: u8,
    },

    /// Frame payload exceeds the allowed maximum
    #[error("frame too large: {size} byte payload (max {max})")]
    FrameTooLarge {
        /// Declared payload size
        size: usize,
        /// Maximum allowed payload size
        max: usize,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
