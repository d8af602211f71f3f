//! Typed record header convention.
//!
//! Pages store opaque bytes. Callers that want self-describing records can
//! prefix the payload with a [`RecordHeader`] before handing it to
//! [`Page::insert_record`](crate::storage::page::Page::insert_record); the page
//! codec never looks at it.

use crate::storage::error::{StorageError, StorageResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const RECORD_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RecordType {
    Json = 1,
    Blob = 2,
    User = 3,
    Session = 4,
}

impl TryFrom<u32> for RecordType {
    type Error = StorageError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RecordType::Json),
            2 => Ok(RecordType::Blob),
            3 => Ok(RecordType::User),
            4 => Ok(RecordType::Session),
            other => Err(StorageError::InvalidArgument(format!(
                "unknown record type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: RecordType,
    /// Payload length in bytes, not counting the header.
    pub size: u32,
    /// Creation time, in seconds since the Unix epoch.
    pub created_at: u64,
    /// Bumped by writers for optimistic concurrency checks.
    pub version: u32,
}

impl RecordHeader {
    /// Encodes the header followed by `payload`.
    pub fn encode(
        record_type: RecordType,
        created_at: u64,
        version: u32,
        payload: &[u8],
    ) -> StorageResult<Vec<u8>> {
        let size = u32::try_from(payload.len()).map_err(|_| {
            StorageError::InvalidArgument(format!("payload of {} bytes is too large", payload.len()))
        })?;

        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        buf.write_u32::<LittleEndian>(record_type as u32)?;
        buf.write_u32::<LittleEndian>(size)?;
        buf.write_u64::<LittleEndian>(created_at)?;
        buf.write_u32::<LittleEndian>(version)?;
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    /// Splits an encoded record into its header and payload.
    pub fn decode(bytes: &[u8]) -> StorageResult<(RecordHeader, &[u8])> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "record of {} bytes is shorter than its header",
                bytes.len()
            )));
        }

        let mut cursor = Cursor::new(bytes);
        let record_type = RecordType::try_from(cursor.read_u32::<LittleEndian>()?)?;
        let size = cursor.read_u32::<LittleEndian>()?;
        let created_at = cursor.read_u64::<LittleEndian>()?;
        let version = cursor.read_u32::<LittleEndian>()?;

        let payload = &bytes[RECORD_HEADER_SIZE..];
        if payload.len() != size as usize {
            return Err(StorageError::InvalidArgument(format!(
                "record header declares {} payload bytes, found {}",
                size,
                payload.len()
            )));
        }

        let header = RecordHeader {
            record_type,
            size,
            created_at,
            version,
        };
        Ok((header, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{Page, PageId, PageType};
    use anyhow::Result;

    #[test]
    fn test_typed_record_through_page() -> Result<()> {
        let mut page = Page::new(PageId(1), PageType::Data)?;
        let encoded = RecordHeader::encode(RecordType::Json, 1_700_000_000, 3, br#"{"id":1}"#)?;
        assert_eq!(encoded.len(), RECORD_HEADER_SIZE + 8);

        let slot = page.insert_record(&encoded)?;
        let (header, payload) = RecordHeader::decode(page.record(slot)?)?;

        assert_eq!(header.record_type, RecordType::Json);
        assert_eq!(header.size, 8);
        assert_eq!(header.created_at, 1_700_000_000);
        assert_eq!(header.version, 3);
        assert_eq!(payload, br#"{"id":1}"#);
        Ok(())
    }

    #[test]
    fn test_decode_rejects_malformed() -> Result<()> {
        assert!(RecordHeader::decode(&[1, 0, 0]).is_err());

        let mut encoded = RecordHeader::encode(RecordType::Session, 0, 0, b"abc")?;
        encoded.push(0);
        assert!(RecordHeader::decode(&encoded).is_err());

        let mut encoded = RecordHeader::encode(RecordType::Blob, 0, 0, b"")?;
        encoded[0] = 9;
        assert!(matches!(
            RecordHeader::decode(&encoded),
            Err(StorageError::InvalidArgument(_))
        ));
        Ok(())
    }
}
