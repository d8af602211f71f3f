pub mod clock;
pub mod replacer;

use crate::storage::config::BufferPoolConfig;
use crate::storage::disk::PersistenceBackend;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{check_page_id, Page, PageId, PageType};
use clock::ClockReplacer;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use replacer::{FrameId, Replacer};
use std::collections::{HashMap, TryReserveError};
use std::sync::Arc;
use std::time::Instant;

struct Frame {
    page: Arc<RwLock<Page>>,
    page_id: Option<PageId>,
    pin_count: u32,
    is_dirty: bool,
    /// Bumped whenever the frame is installed or marked dirty, so a write-back
    /// started from an older copy can tell it has been overtaken.
    version: u64,
    last_access: Instant,
}

/// A dirty frame picked for write-back while the pool lock was held.
struct DirtyFrame {
    frame_id: FrameId,
    page_id: PageId,
    version: u64,
    page: Arc<RwLock<Page>>,
}

/// Snapshot of the frame caching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub pin_count: u32,
    pub is_dirty: bool,
    pub last_access: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub write_backs: u64,
}

/// A fixed set of page frames in front of a [`PersistenceBackend`].
///
/// All bookkeeping (page table, frames, clock hand, backend) sits behind one
/// mutex that each operation holds from lookup to installation, backend I/O
/// included. Page contents are guarded separately per frame. Flushing copies
/// pinned pages without holding the pool mutex, so a caller may keep a pinned
/// page's guard across calls into the pool.
///
/// A dirty frame is always written back before it is reused for another page.
pub struct BufferPool {
    state: Mutex<Option<PoolState>>,
    capacity: usize,
}

struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    replacer: Box<dyn Replacer>,
    backend: Box<dyn PersistenceBackend>,
    stats: BufferPoolStats,
}

impl BufferPool {
    pub fn new<B>(config: BufferPoolConfig, backend: B) -> StorageResult<Self>
    where
        B: PersistenceBackend + 'static,
    {
        let capacity = config.capacity;
        if capacity == 0 {
            return Err(StorageError::InvalidArgument(
                "buffer pool needs at least one frame".to_string(),
            ));
        }

        let out_of_memory = |_: TryReserveError| StorageError::OutOfMemory { frames: capacity };
        let mut frames = Vec::new();
        frames.try_reserve_exact(capacity).map_err(out_of_memory)?;
        let now = Instant::now();
        for _ in 0..capacity {
            frames.push(Frame {
                page: Arc::new(RwLock::new(Page::try_zeroed().map_err(out_of_memory)?)),
                page_id: None,
                pin_count: 0,
                is_dirty: false,
                version: 0,
                last_access: now,
            });
        }
        let mut page_table = HashMap::new();
        page_table.try_reserve(capacity).map_err(out_of_memory)?;

        info!("Initialized buffer pool with {} frames", capacity);
        Ok(Self {
            state: Mutex::new(Some(PoolState {
                frames,
                page_table,
                replacer: Box::new(ClockReplacer::new(capacity)),
                backend: Box::new(backend),
                stats: BufferPoolStats::default(),
            })),
            capacity,
        })
    }

    /// Pins `page_id`, loading it from the backend on a miss.
    ///
    /// A page the backend has never stored comes back as an empty data page.
    /// Every successful call must be matched by one [`unpin_page`](Self::unpin_page).
    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageHandle> {
        check_page_id(page_id)?;
        self.with_state(|state| state.fetch(page_id))
    }

    /// Like [`fetch_page`](Self::fetch_page), but unpins when the guard drops.
    pub fn fetch_page_guard(&self, page_id: PageId) -> StorageResult<PageGuard<'_>> {
        let handle = self.fetch_page(page_id)?;
        Ok(PageGuard {
            pool: self,
            handle,
            is_dirty: false,
        })
    }

    /// Allocates a page id from the backend and pins an empty page for it.
    ///
    /// The new page starts dirty so it reaches the backend even if untouched.
    pub fn new_page(&self, page_type: PageType) -> StorageResult<(PageId, PageHandle)> {
        self.with_state(|state| state.new_page(page_type))
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> StorageResult<()> {
        self.with_state(|state| state.unpin(page_id, is_dirty))
    }

    /// Writes `page_id` back if it is resident and dirty, pinned or not.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        let dirty = self.with_state(|state| {
            Ok(state
                .page_table
                .get(&page_id)
                .and_then(|&frame_id| state.dirty_frame(frame_id)))
        })?;
        self.write_back(dirty)
    }

    pub fn flush_all(&self) -> StorageResult<()> {
        let dirty = self.with_state(|state| {
            Ok((0..state.frames.len())
                .filter_map(|frame_id| state.dirty_frame(frame_id))
                .collect::<Vec<_>>())
        })?;
        self.write_back(dirty)?;
        self.with_state(|state| state.backend.sync())
    }

    /// Flushes every dirty frame and releases the frames.
    ///
    /// If flushing fails the pool stays open and the call may be retried.
    /// Afterwards every operation fails with `PoolNotInitialized`.
    pub fn shutdown(&self) -> StorageResult<()> {
        loop {
            self.flush_all()?;

            let mut guard = self.state.lock();
            let state = guard.as_mut().ok_or(StorageError::PoolNotInitialized)?;
            // Pages dirtied while the flush ran need another pass
            if (0..state.frames.len()).any(|frame_id| state.dirty_frame(frame_id).is_some()) {
                continue;
            }

            let pinned = state.frames.iter().filter(|f| f.pin_count > 0).count();
            if pinned > 0 {
                warn!("Shutting down buffer pool with {} pinned frames", pinned);
            }
            let stats = state.stats;
            *guard = None;

            info!("Buffer pool shut down: {:?}", stats);
            return Ok(());
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Number of frames currently caching a page.
    pub fn resident_count(&self) -> usize {
        self.state.lock().as_ref().map_or(0, |s| s.page_table.len())
    }

    /// Number of frames the clock may currently evict.
    pub fn evictable_count(&self) -> usize {
        self.state.lock().as_ref().map_or(0, |s| s.replacer.size())
    }

    pub fn frame_info(&self, page_id: PageId) -> Option<FrameInfo> {
        let guard = self.state.lock();
        let state = guard.as_ref()?;
        let frame_id = *state.page_table.get(&page_id)?;
        let frame = &state.frames[frame_id];
        Some(FrameInfo {
            frame_id,
            pin_count: frame.pin_count,
            is_dirty: frame.is_dirty,
            last_access: frame.last_access,
        })
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.state
            .lock()
            .as_ref()
            .map_or_else(BufferPoolStats::default, |s| s.stats)
    }

    /// Copies each page with the pool unlocked, then writes the copy under it.
    fn write_back(&self, dirty: impl IntoIterator<Item = DirtyFrame>) -> StorageResult<()> {
        for frame in dirty {
            let image = frame.page.read().clone();
            self.with_state(|state| state.write_image(&frame, &image))?;
        }
        Ok(())
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut PoolState) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(StorageError::PoolNotInitialized)?;
        f(state)
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if let Some(state) = self.state.get_mut().as_mut() {
            if let Err(e) = state.flush_all() {
                warn!("Failed to flush buffer pool on drop: {}", e);
            }
        }
    }
}

impl PoolState {
    fn fetch(&mut self, page_id: PageId) -> StorageResult<PageHandle> {
        if let Some(&frame_id) = self.page_table.get(&page_id) {
            let frame = &mut self.frames[frame_id];
            frame.pin_count += 1;
            frame.last_access = Instant::now();
            self.replacer.pin(frame_id);
            self.stats.hits += 1;

            trace!("Buffer hit for page {} in frame {}", page_id, frame_id);
            return Ok(PageHandle::new(page_id, frame.page.clone()));
        }

        trace!("Buffer miss for page {}", page_id);

        let frame_id = self.take_victim()?;
        if let Err(e) = self.load(frame_id, page_id) {
            self.replacer.unpin(frame_id);
            return Err(e);
        }
        self.stats.misses += 1;
        Ok(self.install(frame_id, page_id, false))
    }

    fn new_page(&mut self, page_type: PageType) -> StorageResult<(PageId, PageHandle)> {
        let frame_id = self.take_victim()?;
        match self.allocate_into(frame_id, page_type) {
            Ok(page_id) => Ok((page_id, self.install(frame_id, page_id, true))),
            Err(e) => {
                self.replacer.unpin(frame_id);
                Err(e)
            }
        }
    }

    fn unpin(&mut self, page_id: PageId, is_dirty: bool) -> StorageResult<()> {
        let frame_id = *self
            .page_table
            .get(&page_id)
            .ok_or(StorageError::PageNotFound(page_id))?;
        let frame = &mut self.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(StorageError::PageNotPinned(page_id));
        }

        frame.pin_count -= 1;
        if is_dirty {
            frame.is_dirty = true;
            frame.version += 1;
        }
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        Ok(())
    }

    fn flush_all(&mut self) -> StorageResult<()> {
        for frame_id in 0..self.frames.len() {
            self.flush_frame(frame_id)?;
        }
        self.backend.sync()
    }

    fn dirty_frame(&self, frame_id: FrameId) -> Option<DirtyFrame> {
        let frame = &self.frames[frame_id];
        match (frame.page_id, frame.is_dirty) {
            (Some(page_id), true) => Some(DirtyFrame {
                frame_id,
                page_id,
                version: frame.version,
                page: frame.page.clone(),
            }),
            _ => None,
        }
    }

    /// Writes a copy taken from `dirty` unless the frame moved on since.
    ///
    /// A frame that was reused or re-dirtied keeps its dirty flag and is left
    /// for a later flush, so an older copy never overwrites a newer one.
    fn write_image(&mut self, dirty: &DirtyFrame, image: &Page) -> StorageResult<()> {
        let frame = &mut self.frames[dirty.frame_id];
        if frame.page_id != Some(dirty.page_id) || !frame.is_dirty || frame.version != dirty.version
        {
            trace!("Skipping stale copy of page {}", dirty.page_id);
            return Ok(());
        }

        self.backend
            .write_page(dirty.page_id, image.as_bytes())
            .map_err(|e| StorageError::WriteBack {
                page_id: dirty.page_id,
                source: Box::new(e),
            })?;
        frame.is_dirty = false;
        self.stats.write_backs += 1;
        debug!("Wrote back page {} from frame {}", dirty.page_id, dirty.frame_id);
        Ok(())
    }

    /// Writes a frame back in place. Only for frames nobody else can reach:
    /// eviction victims and the frames of a pool being dropped.
    fn flush_frame(&mut self, frame_id: FrameId) -> StorageResult<()> {
        let frame = &mut self.frames[frame_id];
        if let (Some(page_id), true) = (frame.page_id, frame.is_dirty) {
            let page = frame.page.read();
            self.backend
                .write_page(page_id, page.as_bytes())
                .map_err(|e| StorageError::WriteBack {
                    page_id,
                    source: Box::new(e),
                })?;
            drop(page);

            frame.is_dirty = false;
            self.stats.write_backs += 1;
            debug!("Wrote back page {} from frame {}", page_id, frame_id);
        }
        Ok(())
    }

    /// Picks a frame with the clock and empties it, writing it back if dirty.
    ///
    /// On failure the frame keeps its page and stays evictable.
    fn take_victim(&mut self) -> StorageResult<FrameId> {
        let frame_id = self.replacer.evict().ok_or(StorageError::PoolExhausted {
            capacity: self.frames.len(),
        })?;

        if let Err(e) = self.flush_frame(frame_id) {
            self.replacer.unpin(frame_id);
            return Err(e);
        }

        let frame = &mut self.frames[frame_id];
        if let Some(old_page_id) = frame.page_id.take() {
            self.page_table.remove(&old_page_id);
            self.stats.evictions += 1;
            debug!("Evicted page {} from frame {}", old_page_id, frame_id);
        }
        Ok(frame_id)
    }

    fn load(&mut self, frame_id: FrameId, page_id: PageId) -> StorageResult<()> {
        let mut page = self.frames[frame_id].page.write();
        match self.backend.read_page(page_id, page.bytes_mut()) {
            Ok(()) if page.is_zeroed() => page.initialize(page_id, PageType::Data),
            Ok(()) => {
                page.validate()?;
                if page.page_id() != page_id {
                    return Err(StorageError::corrupt(
                        page_id,
                        format!("header names page {}", page.page_id()),
                    ));
                }
                Ok(())
            }
            Err(StorageError::PageNotFound(_)) => page.initialize(page_id, PageType::Data),
            Err(e) => Err(e),
        }
    }

    fn allocate_into(&mut self, frame_id: FrameId, page_type: PageType) -> StorageResult<PageId> {
        let page_id = loop {
            let page_id = self.backend.allocate_page_id()?;
            if !self.page_table.contains_key(&page_id) {
                break page_id;
            }
        };
        self.frames[frame_id]
            .page
            .write()
            .initialize(page_id, page_type)?;
        Ok(page_id)
    }

    fn install(&mut self, frame_id: FrameId, page_id: PageId, is_dirty: bool) -> PageHandle {
        let frame = &mut self.frames[frame_id];
        frame.page_id = Some(page_id);
        frame.pin_count = 1;
        frame.is_dirty = is_dirty;
        frame.version += 1;
        frame.last_access = Instant::now();
        self.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        debug!("Installed page {} in frame {}", page_id, frame_id);
        PageHandle::new(page_id, frame.page.clone())
    }
}

/// A pinned page.
///
/// The handle stays valid until the matching `unpin_page`; after that the frame
/// may be reused for another page.
#[derive(Debug)]
pub struct PageHandle {
    page_id: PageId,
    page: Arc<RwLock<Page>>,
}

impl PageHandle {
    fn new(page_id: PageId, page: Arc<RwLock<Page>>) -> Self {
        Self { page_id, page }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }
}

/// A pin that is released on drop, dirty if the page was written through it.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    handle: PageHandle,
    is_dirty: bool,
}

impl PageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.handle.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.handle.read()
    }

    pub fn write(&mut self) -> RwLockWriteGuard<'_, Page> {
        self.is_dirty = true;
        self.handle.write()
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.unpin_page(self.handle.page_id, self.is_dirty) {
            warn!("Failed to unpin page {}: {}", self.handle.page_id, e);
        }
    }
}
