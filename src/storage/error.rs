//! Storage layer error types.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Page is full: requires {required} bytes but only {available} available")]
    PageFull { required: usize, available: usize },

    #[error("Record not found: slot {slot_id} is out of range or deleted")]
    RecordNotFound { slot_id: u16 },

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    /// The "not found" case of unpinning: the page is resident but its pin
    /// count is already zero, so there is no pin to release.
    #[error("Page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("Buffer too small: record needs {required} bytes, buffer holds {provided}")]
    BufferTooSmall { required: usize, provided: usize },

    #[error("Corrupt page {page_id}: {reason}")]
    CorruptPage { page_id: PageId, reason: String },

    #[error("Buffer pool exhausted: all {capacity} frames are pinned")]
    PoolExhausted { capacity: usize },

    #[error("Failed to write back dirty page {page_id}: {source}")]
    WriteBack {
        page_id: PageId,
        #[source]
        source: Box<StorageError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of memory: cannot allocate {frames} frames")]
    OutOfMemory { frames: usize },

    #[error("Buffer pool is not initialized")]
    PoolNotInitialized,
}

impl StorageError {
    pub(crate) fn corrupt(page_id: PageId, reason: impl Into<String>) -> Self {
        StorageError::CorruptPage {
            page_id,
            reason: reason.into(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
