//! Error types for resource store operations

use std::io;
use thiserror::Error;

use crate::types::ResourceId;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// The closed error taxonomy of the store.
///
/// Per-resource failures are recovered by the manager (logged, flagged
/// in the bad-resource diagnostic, surfaced to the caller as `None`);
/// only total failure to recognize any index format at startup is
/// fatal.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Resource {0} is empty")]
    EmptyResource(ResourceId),

    #[error("Invalid map entry for {id}: {reason}")]
    InvalidMapEntry { id: ResourceId, reason: String },

    #[error("No resource map of any known generation found in {0}")]
    MapNotFound(String),

    #[error("No resource data files found for map {0}")]
    NoDataFilesFound(String),

    #[error("Unknown compression tag {0}")]
    UnknownCompression(u16),

    #[error("Decompression sanity check failed: {0}")]
    DecompressionSanityFailed(String),

    #[error("Resource size {size} exceeds cap {max}")]
    ResourceTooLarge { size: usize, max: usize },
}

impl From<sci_codec::Error> for StoreError {
    fn from(e: sci_codec::Error) -> Self {
        match e {
            sci_codec::Error::Io(io) => Self::Io(io),
            sci_codec::Error::OutputTooLarge { declared, max } => {
                Self::ResourceTooLarge { size: declared, max }
            }
            other => Self::DecompressionSanityFailed(other.to_string()),
        }
    }
}
