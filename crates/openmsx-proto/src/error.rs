use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    #[error("malformed XML at line {line}, column {column}: {reason}")]
    Malformed {
        line: usize,
        column: usize,
        reason: String,
    },
    #[error("hex block length mismatch: expected {expected} characters, got {actual}")]
    HexLength { expected: usize, actual: usize },
    #[error("invalid hex character {character:?} at index {index}")]
    InvalidHex { character: char, index: usize },
    #[error("block range {offset}+{len} exceeds buffer of {available} bytes")]
    BlockRange {
        offset: usize,
        len: usize,
        available: usize,
    },
}
