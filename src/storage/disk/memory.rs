use crate::storage::disk::{PersistenceBackend, PAGE_SIZE};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{check_page_id, PageId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// In-memory page storage.
///
/// Clones share the same pages, so a test can hand one clone to a buffer pool
/// and inspect what the pool wrote through another.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    pages: HashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    next_page_id: u32,
    reads: u64,
    write_log: Vec<PageId>,
    fail_writes: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored image of `page_id`, if any.
    pub fn page_image(&self, page_id: PageId) -> Option<Box<[u8; PAGE_SIZE]>> {
        self.inner.lock().pages.get(&page_id).cloned()
    }

    /// Overwrites the stored image of `page_id` without going through a pool.
    pub fn put_page_image(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) {
        self.inner.lock().pages.insert(page_id, Box::new(*data));
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().pages.contains_key(&page_id)
    }

    pub fn read_count(&self) -> u64 {
        self.inner.lock().reads
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().write_log.len()
    }

    /// Page ids in the order they were written.
    pub fn write_log(&self) -> Vec<PageId> {
        self.inner.lock().write_log.clone()
    }

    /// Makes every subsequent write fail with an I/O error while `fail` is set.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }
}

impl PersistenceBackend for MemoryBackend {
    fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        check_page_id(page_id)?;

        let mut state = self.inner.lock();
        state.reads += 1;
        let image = state
            .pages
            .get(&page_id)
            .ok_or(StorageError::PageNotFound(page_id))?;
        buf.copy_from_slice(&image[..]);
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        check_page_id(page_id)?;

        let mut state = self.inner.lock();
        if state.fail_writes {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("injected write failure for page {}", page_id),
            )));
        }
        state.pages.insert(page_id, Box::new(*data));
        state.write_log.push(page_id);
        state.next_page_id = state.next_page_id.max(page_id.0);
        Ok(())
    }

    fn allocate_page_id(&mut self) -> StorageResult<PageId> {
        let mut state = self.inner.lock();
        state.next_page_id = state
            .next_page_id
            .checked_add(1)
            .ok_or_else(|| StorageError::InvalidArgument("page id space exhausted".to_string()))?;
        Ok(PageId(state.next_page_id))
    }
}
