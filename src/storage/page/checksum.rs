//! Page checksums.
//!
//! CRC-32 with the reflected polynomial `0xEDB88320`, the register starting at
//! zero and no final inversion. `crc32fast` conditions its register with `!` on
//! entry and exit, so seeding it with `!0` and inverting the result yields the
//! unconditioned value.

use crate::storage::disk::PAGE_SIZE;

/// Byte offset of the 4-byte checksum field in the page header.
pub const CHECKSUM_OFFSET: usize = 12;

/// Computes the checksum of a page image, skipping the checksum field itself.
pub fn compute_page_checksum(page: &[u8; PAGE_SIZE]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(!0);
    hasher.update(&page[..CHECKSUM_OFFSET]);
    hasher.update(&page[CHECKSUM_OFFSET + 4..]);
    !hasher.finalize()
}

/// Reads the checksum stored in the header of a page image.
pub fn stored_checksum(page: &[u8; PAGE_SIZE]) -> u32 {
    u32::from_le_bytes([
        page[CHECKSUM_OFFSET],
        page[CHECKSUM_OFFSET + 1],
        page[CHECKSUM_OFFSET + 2],
        page[CHECKSUM_OFFSET + 3],
    ])
}

pub fn verify_page_checksum(page: &[u8; PAGE_SIZE]) -> bool {
    stored_checksum(page) == compute_page_checksum(page)
}
