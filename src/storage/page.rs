pub mod checksum;
pub mod record;
pub mod slotted_page;

use crate::storage::error::{StorageError, StorageResult};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// Never names a real page; marks an empty frame.
    pub const INVALID: PageId = PageId(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a page holds. Stored as a `u32` in the page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PageType {
    Data = 1,
    Index = 2,
    LargeObject = 3,
    Metadata = 4,
}

impl TryFrom<u32> for PageType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PageType::Data),
            2 => Ok(PageType::Index),
            3 => Ok(PageType::LargeObject),
            4 => Ok(PageType::Metadata),
            other => Err(other),
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageType::Data => "data",
            PageType::Index => "index",
            PageType::LargeObject => "large-object",
            PageType::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

pub(crate) fn check_page_id(page_id: PageId) -> StorageResult<()> {
    if page_id.is_valid() {
        Ok(())
    } else {
        Err(StorageError::InvalidArgument(format!(
            "page id {} is reserved for empty frames",
            page_id
        )))
    }
}

pub use slotted_page::{Page, Slot, SlotId, HEADER_SIZE, RESERVED_SLOTS, SLOT_SIZE};
