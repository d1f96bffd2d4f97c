//! Error types for resource decompression

use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Codec error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Compressed stream ended before the declared output was produced
    #[error("Truncated input: needed {expected} more bits, stream exhausted")]
    TruncatedData { expected: u32 },

    /// Malformed compressed data detected before it could overrun the output
    #[error("Decompression sanity check failed: {0}")]
    SanityCheckFailed(String),

    /// Declared output size exceeds the absolute resource size cap
    #[error("Declared output size {declared} exceeds cap {max}")]
    OutputTooLarge { declared: usize, max: usize },
}
