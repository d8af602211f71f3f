use crate::storage::config::DiskConfig;
use crate::storage::disk::PersistenceBackend;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{check_page_id, PageId};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const PAGE_SIZE: usize = 4096;

/// File-backed page storage. Page `n` occupies bytes `(n - 1) * PAGE_SIZE ..`
/// since page id 0 is never stored.
pub struct PageManager {
    file: File,
    path: PathBuf,
    config: DiskConfig,
}

impl PageManager {
    pub fn create(path: &Path) -> StorageResult<Self> {
        Self::create_with_config(path, DiskConfig::default())
    }

    pub fn create_with_config(path: &Path, config: DiskConfig) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        debug!("Created page file {:?}", path);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            config,
        })
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_config(path, DiskConfig::default())
    }

    pub fn open_with_config(path: &Path, config: DiskConfig) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        debug!("Opened page file {:?}", path);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        page_count(file_size)
    }

    fn page_offset(page_id: PageId) -> u64 {
        (page_id.0 as u64 - 1) * PAGE_SIZE as u64
    }
}

fn page_count(file_size: u64) -> StorageResult<u32> {
    u32::try_from(file_size / PAGE_SIZE as u64).map_err(|_| {
        StorageError::InvalidArgument(format!(
            "page file of {} bytes exceeds the page id space",
            file_size
        ))
    })
}

fn next_page_id(current_pages: u32) -> StorageResult<PageId> {
    current_pages
        .checked_add(1)
        .map(PageId)
        .ok_or_else(|| StorageError::InvalidArgument("page id space exhausted".to_string()))
}

impl PersistenceBackend for PageManager {
    fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        check_page_id(page_id)?;

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();
        if offset + PAGE_SIZE as u64 > file_size {
            return Err(StorageError::PageNotFound(page_id));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        check_page_id(page_id)?;

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        // Extend file if necessary
        if offset >= file_size {
            self.file.set_len(offset + PAGE_SIZE as u64)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        if self.config.sync_on_write {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn allocate_page_id(&mut self) -> StorageResult<PageId> {
        let current_pages = self.num_pages()?;
        let page_id = next_page_id(current_pages)?;

        // Extend file to include new page
        self.file
            .set_len((current_pages as u64 + 1) * PAGE_SIZE as u64)?;

        debug!("Allocated page {} in {:?}", page_id, self.path);
        Ok(page_id)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
