use crate::storage::disk::PAGE_SIZE;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::checksum::{self, CHECKSUM_OFFSET};
use crate::storage::page::{check_page_id, PageId, PageType};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::collections::TryReserveError;
use std::fmt;

// Header structure (24 bytes, packed)
pub const HEADER_SIZE: usize = 24;
const PAGE_ID_OFFSET: usize = 0;
const PAGE_TYPE_OFFSET: usize = 4;
const FREE_SPACE_OFFSET: usize = 8;
const RECORD_COUNT_OFFSET: usize = 10;
const LSN_OFFSET: usize = 16;

// Slot size (5 bytes: 2 for offset, 2 for length, 1 for flags)
pub const SLOT_SIZE: usize = 5;

/// Slot entries whose space is held back from `free_space` at initialization.
pub const RESERVED_SLOTS: usize = 16;

const SLOT_DELETED: u8 = 0x01;

/// Free space of a freshly initialized page.
const USABLE_SPACE: usize = PAGE_SIZE - HEADER_SIZE - RESERVED_SLOTS * SLOT_SIZE;

pub type SlotId = u16;

/// A slot directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub length: u16,
    pub flags: u8,
}

impl Slot {
    pub fn is_deleted(&self) -> bool {
        self.flags & SLOT_DELETED != 0
    }
}

/// A fixed-size slotted page.
///
/// The slot directory grows forward from the header and record payloads grow
/// backward from the end of the page. Every mutating operation leaves the
/// checksum up to date.
///
/// Deleting a record only tombstones its slot: neither the slot nor the payload
/// bytes are reclaimed, and `free_space` does not grow back. Slot ids and the
/// offsets of live records therefore never move.
#[derive(Clone)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new(page_id: PageId, page_type: PageType) -> StorageResult<Self> {
        let mut page = Self::zeroed();
        page.initialize(page_id, page_type)?;
        Ok(page)
    }

    pub(crate) fn zeroed() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Allocates a zeroed page, reporting allocation failure instead of aborting.
    pub(crate) fn try_zeroed() -> Result<Self, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(PAGE_SIZE)?;
        buf.resize(PAGE_SIZE, 0u8);
        let data: Box<[u8; PAGE_SIZE]> = match buf.into_boxed_slice().try_into() {
            Ok(data) => data,
            Err(_) => unreachable!("buffer was sized to PAGE_SIZE"),
        };
        Ok(Self { data })
    }

    /// Decodes and validates a page image.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "page image must be {} bytes, got {}",
                PAGE_SIZE,
                bytes.len()
            )));
        }
        let mut page = Self::zeroed();
        page.data.copy_from_slice(bytes);
        page.validate()?;
        Ok(page)
    }

    /// Resets the page to an empty page of the given id and type.
    pub fn initialize(&mut self, page_id: PageId, page_type: PageType) -> StorageResult<()> {
        check_page_id(page_id)?;

        self.data.fill(0);
        LittleEndian::write_u32(&mut self.data[PAGE_ID_OFFSET..], page_id.0);
        LittleEndian::write_u32(&mut self.data[PAGE_TYPE_OFFSET..], page_type as u32);
        self.set_free_space(USABLE_SPACE as u16);
        self.set_record_count(0);
        self.update_checksum();

        debug!(
            "Initialized page {}, type {}, free space: {}",
            page_id, page_type, USABLE_SPACE
        );
        Ok(())
    }

    pub fn insert_record(&mut self, record: &[u8]) -> StorageResult<SlotId> {
        let available = self.free_space() as usize;
        let required = record.len() + SLOT_SIZE;
        if required > available {
            return Err(StorageError::PageFull {
                required,
                available,
            });
        }

        let cursor = self.write_cursor()?;
        let offset = cursor - record.len();
        let slot_id = self.record_count();

        self.data[offset..cursor].copy_from_slice(record);
        self.write_slot(
            slot_id,
            Slot {
                offset: offset as u16,
                length: record.len() as u16,
                flags: 0,
            },
        );
        self.set_record_count(slot_id + 1);
        self.set_free_space((available - required) as u16);
        self.update_checksum();

        debug!(
            "Inserted record at slot {} of page {}, size {} bytes",
            slot_id,
            self.page_id(),
            record.len()
        );
        Ok(slot_id)
    }

    /// Copies a record into `buf` and returns its length.
    pub fn get_record(&self, slot_id: SlotId, buf: &mut [u8]) -> StorageResult<usize> {
        let record = self.record(slot_id)?;
        if buf.len() < record.len() {
            return Err(StorageError::BufferTooSmall {
                required: record.len(),
                provided: buf.len(),
            });
        }
        buf[..record.len()].copy_from_slice(record);
        Ok(record.len())
    }

    /// Borrows a record's payload in place.
    pub fn record(&self, slot_id: SlotId) -> StorageResult<&[u8]> {
        let slot = self.live_slot(slot_id)?;
        let start = slot.offset as usize;
        let end = start + slot.length as usize;
        if end > PAGE_SIZE {
            return Err(StorageError::corrupt(
                self.page_id(),
                format!("slot {} points past the end of the page", slot_id),
            ));
        }
        Ok(&self.data[start..end])
    }

    pub fn delete_record(&mut self, slot_id: SlotId) -> StorageResult<()> {
        let mut slot = self.live_slot(slot_id)?;
        slot.flags |= SLOT_DELETED;
        self.write_slot(slot_id, slot);
        self.update_checksum();

        debug!("Deleted slot {} of page {}", slot_id, self.page_id());
        Ok(())
    }

    /// Iterates over the records that have not been deleted.
    pub fn live_records(&self) -> impl Iterator<Item = (SlotId, &[u8])> + '_ {
        (0..self.record_count())
            .filter_map(move |slot_id| self.record(slot_id).ok().map(|r| (slot_id, r)))
    }

    pub fn slot(&self, slot_id: SlotId) -> Option<Slot> {
        if slot_id >= self.record_count() {
            return None;
        }
        let pos = Self::slot_position(slot_id);
        if pos + SLOT_SIZE > PAGE_SIZE {
            return None;
        }
        Some(Slot {
            offset: LittleEndian::read_u16(&self.data[pos..]),
            length: LittleEndian::read_u16(&self.data[pos + 2..]),
            flags: self.data[pos + 4],
        })
    }

    pub fn page_id(&self) -> PageId {
        PageId(LittleEndian::read_u32(&self.data[PAGE_ID_OFFSET..]))
    }

    pub fn page_type(&self) -> StorageResult<PageType> {
        let raw = LittleEndian::read_u32(&self.data[PAGE_TYPE_OFFSET..]);
        PageType::try_from(raw).map_err(|raw| {
            StorageError::corrupt(self.page_id(), format!("unknown page type {}", raw))
        })
    }

    pub fn free_space(&self) -> u16 {
        LittleEndian::read_u16(&self.data[FREE_SPACE_OFFSET..])
    }

    pub fn record_count(&self) -> u16 {
        LittleEndian::read_u16(&self.data[RECORD_COUNT_OFFSET..])
    }

    pub fn lsn(&self) -> u64 {
        LittleEndian::read_u64(&self.data[LSN_OFFSET..])
    }

    /// Stamps the log sequence number of the last writer.
    pub fn set_lsn(&mut self, lsn: u64) {
        LittleEndian::write_u64(&mut self.data[LSN_OFFSET..], lsn);
        self.update_checksum();
    }

    pub fn checksum(&self) -> u32 {
        checksum::stored_checksum(&self.data)
    }

    pub fn verify_checksum(&self) -> bool {
        checksum::verify_page_checksum(&self.data)
    }

    /// Checks the checksum, page type, free-space accounting and slot bounds.
    pub fn validate(&self) -> StorageResult<()> {
        let page_id = self.page_id();
        if !self.verify_checksum() {
            return Err(StorageError::corrupt(
                page_id,
                format!(
                    "checksum mismatch: stored {:#010x}, computed {:#010x}",
                    self.checksum(),
                    checksum::compute_page_checksum(&self.data)
                ),
            ));
        }
        self.page_type()?;

        let cursor = self.write_cursor()?;
        for slot_id in 0..self.record_count() {
            let slot = self.slot(slot_id).ok_or_else(|| {
                StorageError::corrupt(page_id, "slot directory overruns the page")
            })?;
            let start = slot.offset as usize;
            let end = start + slot.length as usize;
            if start < cursor || end > PAGE_SIZE {
                return Err(StorageError::corrupt(
                    page_id,
                    format!(
                        "slot {} payload {}..{} lies outside {}..{}",
                        slot_id, start, end, cursor, PAGE_SIZE
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    pub(crate) fn is_zeroed(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Lowest payload offset in use, derived from the header's accounting.
    fn write_cursor(&self) -> StorageResult<usize> {
        let slot_bytes = self.record_count() as usize * SLOT_SIZE;
        let payload_used = USABLE_SPACE
            .checked_sub(self.free_space() as usize + slot_bytes)
            .ok_or_else(|| {
                StorageError::corrupt(
                    self.page_id(),
                    "free space and slot directory exceed the page",
                )
            })?;
        Ok(PAGE_SIZE - payload_used)
    }

    fn slot_position(slot_id: SlotId) -> usize {
        HEADER_SIZE + slot_id as usize * SLOT_SIZE
    }

    fn live_slot(&self, slot_id: SlotId) -> StorageResult<Slot> {
        match self.slot(slot_id) {
            Some(slot) if !slot.is_deleted() => Ok(slot),
            _ => Err(StorageError::RecordNotFound { slot_id }),
        }
    }

    fn write_slot(&mut self, slot_id: SlotId, slot: Slot) {
        let pos = Self::slot_position(slot_id);
        LittleEndian::write_u16(&mut self.data[pos..], slot.offset);
        LittleEndian::write_u16(&mut self.data[pos + 2..], slot.length);
        self.data[pos + 4] = slot.flags;
    }

    fn set_free_space(&mut self, free_space: u16) {
        LittleEndian::write_u16(&mut self.data[FREE_SPACE_OFFSET..], free_space);
    }

    fn set_record_count(&mut self, count: u16) {
        LittleEndian::write_u16(&mut self.data[RECORD_COUNT_OFFSET..], count);
    }

    fn update_checksum(&mut self) {
        let checksum = checksum::compute_page_checksum(&self.data);
        LittleEndian::write_u32(&mut self.data[CHECKSUM_OFFSET..], checksum);
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id())
            .field("page_type", &self.page_type().ok())
            .field("record_count", &self.record_count())
            .field("free_space", &self.free_space())
            .field("lsn", &self.lsn())
            .field("checksum", &format_args!("{:#010x}", self.checksum()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use rand::Rng;

    #[test]
    fn test_page_initialization() -> Result<()> {
        let page = Page::new(PageId(42), PageType::Index)?;

        assert_eq!(page.page_id(), PageId(42));
        assert_eq!(page.page_type()?, PageType::Index);
        assert_eq!(page.record_count(), 0);
        assert_eq!(page.lsn(), 0);
        assert_eq!(page.free_space(), 3992);
        assert!(page.verify_checksum());
        Ok(())
    }

    #[test]
    fn test_initialize_rejects_invalid_id() {
        let result = Page::new(PageId::INVALID, PageType::Data);
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }

    #[test]
    fn test_header_layout() -> Result<()> {
        let mut page = Page::new(PageId(0x0102_0304), PageType::Metadata)?;
        page.set_lsn(0x1122_3344_5566_7788);
        let bytes = page.as_bytes();

        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[4, 0, 0, 0]);
        assert_eq!(&bytes[8..10], &3992u16.to_le_bytes());
        assert_eq!(&bytes[10..12], &[0, 0]);
        assert_eq!(&bytes[12..16], &page.checksum().to_le_bytes());
        assert_eq!(&bytes[16..24], &0x1122_3344_5566_7788u64.to_le_bytes());
        Ok(())
    }

    #[test]
    fn test_insert_and_get_record() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;

        let record1 = b"Hello, World!";
        let slot1 = page.insert_record(record1)?;
        assert_eq!(slot1, 0);

        let record2 = b"Second record";
        let slot2 = page.insert_record(record2)?;
        assert_eq!(slot2, 1);

        let mut buf = [0u8; 64];
        let len = page.get_record(slot1, &mut buf)?;
        assert_eq!(&buf[..len], record1);
        let len = page.get_record(slot2, &mut buf)?;
        assert_eq!(&buf[..len], record2);
        assert_eq!(page.record_count(), 2);

        Ok(())
    }

    #[test]
    fn test_payloads_grow_backward_without_aliasing() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;

        page.insert_record(&[0xAA; 10])?;
        page.insert_record(&[0xBB; 10])?;

        let first = page.slot(0).unwrap();
        let second = page.slot(1).unwrap();
        assert_eq!(first.offset as usize, PAGE_SIZE - 10);
        assert_eq!(second.offset as usize, PAGE_SIZE - 20);
        assert_eq!(&page.as_bytes()[HEADER_SIZE..HEADER_SIZE + 5], &[0xF6, 0x0F, 10, 0, 0]);

        assert_eq!(page.record(0)?, &[0xAA; 10]);
        assert_eq!(page.record(1)?, &[0xBB; 10]);
        Ok(())
    }

    #[test]
    fn test_free_space_accounting() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;

        let before = page.free_space();
        let slot = page.insert_record(b"twelve bytes")?;
        assert_eq!(page.free_space(), before - 12 - SLOT_SIZE as u16);

        let after_insert = page.free_space();
        page.delete_record(slot)?;
        assert_eq!(page.free_space(), after_insert);
        Ok(())
    }

    #[test]
    fn test_delete_record() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;

        let keep = page.insert_record(b"keep me")?;
        let slot = page.insert_record(b"Test record")?;
        page.delete_record(slot)?;

        assert!(matches!(
            page.record(slot),
            Err(StorageError::RecordNotFound { slot_id }) if slot_id == slot
        ));
        assert!(matches!(
            page.delete_record(slot),
            Err(StorageError::RecordNotFound { .. })
        ));
        assert_eq!(page.record(keep)?, b"keep me");
        assert!(page.slot(slot).unwrap().is_deleted());
        assert_eq!(page.record_count(), 2);

        let next = page.insert_record(b"after delete")?;
        assert_eq!(next, 2);
        assert_eq!(page.record(keep)?, b"keep me");
        Ok(())
    }

    #[test]
    fn test_page_full() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;

        let large_record = vec![0xAA; 1000];
        let mut count = 0;
        while page.free_space() as usize >= large_record.len() + SLOT_SIZE {
            page.insert_record(&large_record)?;
            count += 1;
        }
        assert_eq!(count, 3);

        let snapshot = page.as_bytes().to_vec();
        let result = page.insert_record(&large_record);
        assert!(matches!(
            result,
            Err(StorageError::PageFull { required: 1005, available }) if available < 1005
        ));
        assert_eq!(page.as_bytes().to_vec(), snapshot);
        Ok(())
    }

    #[test]
    fn test_fill_with_random_records() -> Result<()> {
        let mut rng = rand::thread_rng();
        let mut page = Page::new(PageId(3), PageType::Data)?;
        let mut inserted = Vec::new();

        loop {
            let len = rng.gen_range(0..200);
            let record: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let before = page.free_space() as usize;
            match page.insert_record(&record) {
                Ok(slot) => {
                    assert_eq!(page.free_space() as usize, before - len - SLOT_SIZE);
                    assert!(page.verify_checksum());
                    inserted.push((slot, record));
                }
                Err(StorageError::PageFull { required, available }) => {
                    assert_eq!(required, len + SLOT_SIZE);
                    assert_eq!(available, before);
                    assert!(required > available);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        for (slot, record) in &inserted {
            assert_eq!(page.record(*slot)?, record.as_slice());
        }
        page.validate()?;
        Ok(())
    }

    #[test]
    fn test_invalid_slot_id() -> Result<()> {
        let page = Page::new(PageId(1), PageType::Data)?;
        let mut buf = [0u8; 8];

        assert!(matches!(
            page.get_record(0, &mut buf),
            Err(StorageError::RecordNotFound { slot_id: 0 })
        ));
        assert!(page.record(100).is_err());
        assert!(page.slot(0).is_none());
        Ok(())
    }

    #[test]
    fn test_buffer_too_small() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;
        let slot = page.insert_record(b"0123456789")?;

        let mut small = [0u8; 4];
        assert!(matches!(
            page.get_record(slot, &mut small),
            Err(StorageError::BufferTooSmall {
                required: 10,
                provided: 4
            })
        ));
        Ok(())
    }

    #[test]
    fn test_empty_record() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;
        let slot = page.insert_record(&[])?;

        let mut buf = [0u8; 0];
        assert_eq!(page.get_record(slot, &mut buf)?, 0);
        assert_eq!(page.free_space() as usize, 3992 - SLOT_SIZE);
        Ok(())
    }

    #[test]
    fn test_checksum_tracks_mutations() -> Result<()> {
        let mut page = Page::new(PageId(9), PageType::Data)?;
        assert!(page.verify_checksum());

        let slot = page.insert_record(b"payload")?;
        assert!(page.verify_checksum());
        page.delete_record(slot)?;
        assert!(page.verify_checksum());
        page.set_lsn(77);
        assert!(page.verify_checksum());

        for pos in [0, 5, 9, 20, HEADER_SIZE, 2048, PAGE_SIZE - 1] {
            let mut copy = page.clone();
            copy.bytes_mut()[pos] ^= 0x40;
            assert!(!copy.verify_checksum(), "flip at {} not detected", pos);
        }
        Ok(())
    }

    #[test]
    fn test_from_existing_data() -> Result<()> {
        let mut page = Page::new(PageId(123), PageType::Data)?;
        page.insert_record(b"Persistent data")?;

        let loaded = Page::from_bytes(page.as_bytes())?;
        assert_eq!(loaded.page_id(), PageId(123));
        assert_eq!(loaded.record_count(), 1);
        assert_eq!(loaded.record(0)?, b"Persistent data");
        Ok(())
    }

    #[test]
    fn test_from_bytes_rejects_bad_images() -> Result<()> {
        assert!(matches!(
            Page::from_bytes(&[0u8; 100]),
            Err(StorageError::InvalidArgument(_))
        ));

        let mut page = Page::new(PageId(5), PageType::Data)?;
        page.insert_record(b"abc")?;

        let mut flipped = page.as_bytes().to_vec();
        flipped[PAGE_SIZE - 1] ^= 1;
        assert!(matches!(
            Page::from_bytes(&flipped),
            Err(StorageError::CorruptPage { page_id: PageId(5), .. })
        ));

        // Consistent checksum over an inconsistent header.
        let mut bad = page.clone();
        bad.set_free_space(4000);
        bad.update_checksum();
        assert!(matches!(bad.validate(), Err(StorageError::CorruptPage { .. })));

        let mut bad = page.clone();
        LittleEndian::write_u32(&mut bad.bytes_mut()[PAGE_TYPE_OFFSET..], 7);
        bad.update_checksum();
        assert!(matches!(bad.validate(), Err(StorageError::CorruptPage { .. })));
        Ok(())
    }

    #[test]
    fn test_live_records_skip_tombstones() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;
        page.insert_record(b"a")?;
        page.insert_record(b"b")?;
        page.insert_record(b"c")?;
        page.delete_record(1)?;

        let live: Vec<(SlotId, Vec<u8>)> = page
            .live_records()
            .map(|(slot, r)| (slot, r.to_vec()))
            .collect();
        assert_eq!(live, vec![(0, b"a".to_vec()), (2, b"c".to_vec())]);
        Ok(())
    }

    #[test]
    fn test_reinitialize_clears_records() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;
        page.insert_record(b"old")?;
        page.initialize(PageId(2), PageType::LargeObject)?;

        assert_eq!(page.page_id(), PageId(2));
        assert_eq!(page.record_count(), 0);
        assert_eq!(page.free_space(), 3992);
        assert!(page.as_bytes()[HEADER_SIZE..].iter().all(|&b| b == 0));
        Ok(())
    }
}
