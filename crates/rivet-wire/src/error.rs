//! Wire error types

use std::io;
use thiserror::Error;

/// Byte-level decoding failures.
///
/// Any of these leaves the stream desynchronized; the decoder that raised it
/// refuses further input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Unexpected type byte: 0x{0:02x}")]
    UnexpectedByte(u8),

    #[error("Malformed header: {0:?}")]
    MalformedHeader(String),

    #[error("Header line too long")]
    HeaderTooLong,

    #[error("Missing CRLF terminator")]
    MissingCrlf,

    #[error("Byte string too large: {0} bytes")]
    BulkTooLarge(u64),

    #[error("Sequence too large: {0} elements")]
    SequenceTooLarge(u64),

    #[error("Nesting too deep (max {0})")]
    TooDeep(usize),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        DecodeError::Io(err.to_string())
    }
}

/// Record-level failures: a well-formed value that is not a valid
/// request or response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame is not a sequence")]
    NotASequence,

    #[error("Frame has an odd number of elements: {0}")]
    OddLength(usize),

    #[error("Field number at position {0} is not an integer")]
    FieldNotInt(usize),

    #[error("Field {field} has the wrong type (expected {expected})")]
    WrongType { field: i64, expected: &'static str },

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Field {0} out of range")]
    OutOfRange(i64),

    #[error("Unknown verb: {0}")]
    UnknownVerb(i64),

    #[error("Invalid UTF-8 in field {0}")]
    InvalidUtf8(i64),
}
