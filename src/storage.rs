//! Page storage for pagestore.
//!
//! This module provides the page-oriented storage layer:
//!
//! - **Page**: Fixed-size (4KB) slotted pages with a checksummed header
//! - **PersistenceBackend**: Reads and writes page images (file or memory)
//! - **BufferPool**: In-memory cache of pages with clock eviction
//!
//! Callers fetch a page from the buffer pool, read or modify its records while
//! it is pinned, and unpin it, marking it dirty if they changed it. Dirty pages
//! reach the backend on eviction, on flush, and at shutdown.

pub mod buffer;
pub mod config;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPool, BufferPoolStats, FrameInfo, PageGuard, PageHandle};
pub use config::{BufferPoolConfig, DiskConfig};
pub use disk::{MemoryBackend, PageManager, PersistenceBackend, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::{Page, PageId, PageType, SlotId};
