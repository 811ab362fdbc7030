use serde::{Deserialize, Serialize};

/// Reasons a map blob could not be produced or parsed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("truncated map blob: needed {needed} bytes at offset {offset}, {available} left")]
    Truncated { offset: usize, needed: usize, available: usize },

    #[error("invalid length {length} at offset {offset}")]
    InvalidLength { offset: usize, length: i32 },

    #[error("invalid UTF-16 text at offset {offset}")]
    InvalidUtf16 { offset: usize },

    #[error("{what} too large to encode: {units} code units")]
    TooLarge { what: &'static str, units: usize },
}
