//! The variable-length record format.
//!
//! Every sample is stored as one self-delimiting record:
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  -------------------------------------
//! 0       4     length     Whole record size, header included
//! 4       4     param_id   Series identifier
//! 8       8     timestamp  Sample time, microseconds
//! 16      *     payload    length - 16 opaque bytes
//! ```
//!
//! The `length` field is authoritative. Records can be appended either
//! pre-serialized (the caller hands the full byte image) or assembled in
//! place from `(param_id, timestamp, payload)` components; both forms
//! produce this exact layout and read back through the same offset.
//!
//! All fields are little-endian `zerocopy` types, so a record header can be
//! decoded at any byte offset of a mapped page without copying.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::types::{ParamId, Timestamp};

/// Fixed prefix of every record.
pub const ENTRY_HEADER_SIZE: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct EntryHeader {
    length: U32,
    param_id: U32,
    timestamp: I64,
}

const _: () = assert!(std::mem::size_of::<EntryHeader>() == ENTRY_HEADER_SIZE);

impl EntryHeader {
    pub fn new(param_id: ParamId, timestamp: Timestamp, payload_len: usize) -> Self {
        Self {
            length: U32::new((ENTRY_HEADER_SIZE + payload_len) as u32),
            param_id: U32::new(param_id),
            timestamp: I64::new(timestamp.value()),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= ENTRY_HEADER_SIZE,
            "buffer too small for EntryHeader: {} < {}",
            bytes.len(),
            ENTRY_HEADER_SIZE
        );

        Self::ref_from_bytes(&bytes[..ENTRY_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse EntryHeader: {:?}", e))
    }

    pub fn length(&self) -> u32 {
        self.length.get()
    }

    pub fn param_id(&self) -> ParamId {
        self.param_id.get()
    }

    pub fn timestamp(&self) -> Timestamp {
        Timestamp(self.timestamp.get())
    }
}

/// Borrowed view of one complete record inside a page.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    header: &'a EntryHeader,
    payload: &'a [u8],
}

impl<'a> Entry<'a> {
    /// Decodes the record starting at `bytes[0]`. The embedded length must
    /// cover at least the header and lie inside the buffer.
    pub fn parse(bytes: &'a [u8]) -> Result<Entry<'a>> {
        let header = EntryHeader::from_bytes(bytes)?;
        let length = header.length() as usize;

        ensure!(
            length >= ENTRY_HEADER_SIZE,
            "record length {} shorter than header",
            length
        );
        ensure!(
            length <= bytes.len(),
            "record length {} exceeds buffer of {} bytes",
            length,
            bytes.len()
        );

        Ok(Entry {
            header,
            payload: &bytes[ENTRY_HEADER_SIZE..length],
        })
    }

    pub fn length(&self) -> u32 {
        self.header.length()
    }

    pub fn param_id(&self) -> ParamId {
        self.header.param_id()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp()
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

/// Owned record image, used by writers that hand the engine a
/// pre-serialized record and by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryBuf {
    bytes: Vec<u8>,
}

impl EntryBuf {
    pub fn new(param_id: ParamId, timestamp: Timestamp, payload: &[u8]) -> Self {
        let header = EntryHeader::new(param_id, timestamp, payload.len());
        let mut bytes = Vec::with_capacity(ENTRY_HEADER_SIZE + payload.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(payload);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_header_size_is_16() {
        assert_eq!(std::mem::size_of::<EntryHeader>(), 16);
    }

    #[test]
    fn build_and_parse_roundtrip() {
        let buf = EntryBuf::new(42, Timestamp(123_456), b"hello");
        let entry = Entry::parse(buf.as_bytes()).unwrap();

        assert_eq!(entry.length() as usize, ENTRY_HEADER_SIZE + 5);
        assert_eq!(entry.param_id(), 42);
        assert_eq!(entry.timestamp(), Timestamp(123_456));
        assert_eq!(entry.payload(), b"hello");
    }

    #[test]
    fn parse_decodes_at_unaligned_offsets() {
        let buf = EntryBuf::new(7, Timestamp(99), b"xyz");
        let mut shifted = vec![0u8; 1];
        shifted.extend_from_slice(buf.as_bytes());

        let entry = Entry::parse(&shifted[1..]).unwrap();
        assert_eq!(entry.param_id(), 7);
        assert_eq!(entry.payload(), b"xyz");
    }

    #[test]
    fn parse_rejects_truncated_header() {
        let result = Entry::parse(&[0u8; 8]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_rejects_length_shorter_than_header() {
        let mut bytes = EntryBuf::new(1, Timestamp(1), b"data").bytes;
        bytes[0..4].copy_from_slice(&8u32.to_le_bytes());

        let result = Entry::parse(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn parse_rejects_length_past_buffer() {
        let mut bytes = EntryBuf::new(1, Timestamp(1), b"data").bytes;
        bytes[0..4].copy_from_slice(&1000u32.to_le_bytes());

        let result = Entry::parse(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn empty_payload_is_a_header_only_record() {
        let buf = EntryBuf::new(3, Timestamp(5), b"");
        let entry = Entry::parse(buf.as_bytes()).unwrap();

        assert_eq!(entry.length() as usize, ENTRY_HEADER_SIZE);
        assert!(entry.payload().is_empty());
    }
}
