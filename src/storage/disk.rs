//! Durable page storage.
//!
//! The buffer pool talks to storage only through [`PersistenceBackend`]. Two
//! backends ship with the crate: [`PageManager`] over a single file and
//! [`MemoryBackend`] for tests and ephemeral pools.

pub mod memory;
pub mod page_manager;

pub use memory::MemoryBackend;
pub use page_manager::{PageManager, PAGE_SIZE};

use crate::storage::error::StorageResult;
use crate::storage::page::PageId;

pub trait PersistenceBackend: Send {
    /// Reads the image of `page_id` into `buf`.
    ///
    /// Returns `StorageError::PageNotFound` if the page has never been stored.
    fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()>;

    /// Stores the image of `page_id`, growing storage if necessary.
    fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()>;

    /// Reserves a fresh page id.
    fn allocate_page_id(&mut self) -> StorageResult<PageId>;

    /// Makes previous writes durable.
    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
