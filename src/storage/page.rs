//! Page layout and operations.
//!
//! A page is the structured content of one volume: a fixed 128-byte header,
//! a forward-growing array of 4-byte entry offsets, and a record heap
//! growing backward from the end of the page. Appends tile records downward
//! and index slots upward until the two regions would meet, at which point
//! the append fails with `Overflow` and the volume ring rotates.
//!
//! Readers only traverse `page_index[0..sync_index)`: the prefix that the
//! background worker has mirrored from the staging cache in sorted order.
//! Appenders extend `page_index[sync_index..count)` without reordering, so
//! appends and index syncs commute as long as `sync_index <= count`.
//!
//! The range search is a three-phase hybrid: interpolation narrowing seeded
//! by the page bounding box, midpoint bisection, then a linear scan that
//! applies the parameter and range filter. The index is sorted by timestamp
//! only, so candidates for one series are sparse among neighbors and the
//! filter belongs in the scan.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I64, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::entry::{Entry, EntryHeader, ENTRY_HEADER_SIZE};
use super::{INDEX_SLOT_SIZE, PAGE_HEADER_SIZE};
use crate::cursor::{CursorResult, InternalCursor};
use crate::error::{StatusCode, WriteError};
use crate::query::{Direction, SearchQuery};
use crate::types::{EntryOffset, ParamId, Timestamp};

pub const PAGE_MAGIC: &[u8; 8] = b"AEONPAG1";
pub const PAGE_VERSION: u32 = 1;

/// Below this index span, interpolation narrowing falls back to bisection.
const INTERPOLATION_SEARCH_CUTOFF: usize = 64;
const INTERPOLATION_SEARCH_QUOTA: u32 = 5;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unknown = 0,
    Index = 1,
    Metadata = 2,
}

impl PageType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => PageType::Index,
            2 => PageType::Metadata,
            _ => PageType::Unknown,
        }
    }
}

/// Min/max envelope over the `(param_id, timestamp)` pairs of a page's
/// live entries. Starts inverted so the first append produces a
/// non-degenerate box; only widens until the next `reuse`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageBoundingBox {
    min_id: U32,
    max_id: U32,
    min_timestamp: I64,
    max_timestamp: I64,
}

impl PageBoundingBox {
    pub fn inverted() -> Self {
        Self {
            min_id: U32::new(u32::MAX),
            max_id: U32::new(0),
            min_timestamp: I64::new(i64::MAX),
            max_timestamp: I64::new(i64::MIN),
        }
    }

    pub fn update(&mut self, param: ParamId, timestamp: Timestamp) {
        let ts = timestamp.value();
        if param < self.min_id.get() {
            self.min_id = U32::new(param);
        }
        if param > self.max_id.get() {
            self.max_id = U32::new(param);
        }
        if ts < self.min_timestamp.get() {
            self.min_timestamp = I64::new(ts);
        }
        if ts > self.max_timestamp.get() {
            self.max_timestamp = I64::new(ts);
        }
    }

    pub fn contains(&self, param: ParamId, timestamp: Timestamp) -> bool {
        let ts = timestamp.value();
        param >= self.min_id.get()
            && param <= self.max_id.get()
            && ts >= self.min_timestamp.get()
            && ts <= self.max_timestamp.get()
    }

    pub fn min_id(&self) -> ParamId {
        self.min_id.get()
    }

    pub fn max_id(&self) -> ParamId {
        self.max_id.get()
    }

    pub fn min_timestamp(&self) -> i64 {
        self.min_timestamp.get()
    }

    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp.get()
    }
}

/// Fixed prefix of every page. All multi-byte fields little-endian.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    magic: [u8; 8],
    version: U32,
    page_type: U32,
    page_id: U32,
    count: U32,
    sync_index: U32,
    last_offset: U32,
    length: U64,
    open_count: U32,
    close_count: U32,
    bbox: PageBoundingBox,
    reserved: [u8; 56],
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    fn new(page_type: PageType, page_id: u32, length: usize) -> Self {
        Self {
            magic: *PAGE_MAGIC,
            version: U32::new(PAGE_VERSION),
            page_type: U32::new(page_type as u32),
            page_id: U32::new(page_id),
            count: U32::new(0),
            sync_index: U32::new(0),
            last_offset: U32::new(length as u32),
            length: U64::new(length as u64),
            open_count: U32::new(0),
            close_count: U32::new(0),
            bbox: PageBoundingBox::inverted(),
            reserved: [0u8; 56],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            bytes.len(),
            PAGE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse PageHeader: {:?}", e))?;

        ensure!(&header.magic == PAGE_MAGIC, "invalid magic bytes in page");
        ensure!(
            header.version.get() == PAGE_VERSION,
            "unsupported page version: {} (expected {})",
            header.version.get(),
            PAGE_VERSION
        );

        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            bytes.len(),
            PAGE_HEADER_SIZE
        );

        let header = Self::mut_from_bytes(&mut bytes[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse PageHeader: {:?}", e))?;

        ensure!(&header.magic == PAGE_MAGIC, "invalid magic bytes in page");

        Ok(header)
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_u32(self.page_type.get())
    }

    pub fn page_id(&self) -> u32 {
        self.page_id.get()
    }

    pub fn count(&self) -> u32 {
        self.count.get()
    }

    pub fn sync_index(&self) -> u32 {
        self.sync_index.get()
    }

    pub fn last_offset(&self) -> u32 {
        self.last_offset.get()
    }

    pub fn length(&self) -> u64 {
        self.length.get()
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.get()
    }

    pub fn set_open_count(&mut self, count: u32) {
        self.open_count = U32::new(count);
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.get()
    }

    pub fn set_close_count(&mut self, count: u32) {
        self.close_count = U32::new(count);
    }

    pub fn bbox(&self) -> PageBoundingBox {
        self.bbox
    }

    /// Byte offset one past the last index slot.
    fn end_of_index(&self) -> usize {
        PAGE_HEADER_SIZE + self.count() as usize * INDEX_SLOT_SIZE
    }

    /// Bytes left between the index array and the record heap.
    pub fn free_space(&self) -> usize {
        self.last_offset() as usize - self.end_of_index()
    }

    /// Clears the page for a new epoch: no entries, heap at the top,
    /// bounding box inverted, `open_count` bumped. The sync position is
    /// reset too so a recycled page never reports a stale prefix.
    pub fn reuse(&mut self) {
        self.count = U32::new(0);
        self.sync_index = U32::new(0);
        self.last_offset = U32::new(self.length.get() as u32);
        self.open_count = U32::new(self.open_count.get() + 1);
        self.bbox = PageBoundingBox::inverted();
    }

    pub fn close(&mut self) {
        self.close_count = U32::new(self.close_count.get() + 1);
    }

    fn validate(&self, buffer_len: usize) -> Result<()> {
        ensure!(
            self.page_type() != PageType::Unknown,
            "invalid page type: {}",
            self.page_type.get()
        );
        ensure!(
            self.length() == buffer_len as u64,
            "page length {} does not match buffer of {} bytes",
            self.length(),
            buffer_len
        );
        ensure!(
            self.sync_index() <= self.count(),
            "sync_index {} ahead of count {}",
            self.sync_index(),
            self.count()
        );
        ensure!(
            self.end_of_index() <= self.last_offset() as usize,
            "page_index end {} overlaps record heap at {}",
            self.end_of_index(),
            self.last_offset()
        );
        ensure!(
            self.last_offset() as u64 <= self.length(),
            "last_offset {} past page length {}",
            self.last_offset(),
            self.length()
        );
        Ok(())
    }
}

/// Read-only view of a page buffer. Constructed only over a buffer whose
/// header passed validation, so index slots below `count` are in bounds.
#[derive(Debug, Clone, Copy)]
pub struct PageView<'a> {
    data: &'a [u8],
}

impl<'a> PageView<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let header = PageHeader::from_bytes(data)?;
        header.validate(data.len())?;
        Ok(Self { data })
    }

    pub fn header(&self) -> &'a PageHeader {
        // header presence was proven in new()
        PageHeader::ref_from_bytes(&self.data[..PAGE_HEADER_SIZE]).expect("validated page header")
    }

    pub fn count(&self) -> u32 {
        self.header().count()
    }

    pub fn sync_index(&self) -> u32 {
        self.header().sync_index()
    }

    pub fn offset_at(&self, index: usize) -> EntryOffset {
        let start = PAGE_HEADER_SIZE + index * INDEX_SLOT_SIZE;
        let bytes = &self.data[start..start + INDEX_SLOT_SIZE];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Decodes the entry at index slot `index` (bounded by `count`).
    pub fn entry_at(&self, index: usize) -> Result<Entry<'a>> {
        ensure!(
            index < self.count() as usize,
            "entry index {} out of bounds (count={})",
            index,
            self.count()
        );
        self.read_entry(self.offset_at(index))
    }

    /// Decodes the entry at a raw page offset, checked against the record
    /// heap bounds.
    pub fn read_entry(&self, offset: EntryOffset) -> Result<Entry<'a>> {
        let offset = offset as usize;
        ensure!(
            offset >= self.header().end_of_index() && offset < self.data.len(),
            "entry offset {} outside the record heap",
            offset
        );
        Entry::parse(&self.data[offset..])
    }

    fn entry_key(&self, index: usize) -> Result<(i64, ParamId), StatusCode> {
        let offset = self.offset_at(index) as usize;
        let bytes = self.data.get(offset..).ok_or(StatusCode::BadData)?;
        let header = EntryHeader::from_bytes(bytes).map_err(|_| StatusCode::BadData)?;
        Ok((header.timestamp().value(), header.param_id()))
    }

    /// Runs a single-parameter range search over the synced prefix of the
    /// index, feeding results to `cursor` in scan order.
    pub fn search(&self, query: &SearchQuery, cursor: &mut dyn InternalCursor) {
        if query.validate().is_err() {
            cursor.set_error(StatusCode::BadArg);
            return;
        }
        if let Err(code) = self.search_inner(query, cursor) {
            cursor.set_error(code);
        }
    }

    fn search_inner(
        &self,
        query: &SearchQuery,
        cursor: &mut dyn InternalCursor,
    ) -> Result<(), StatusCode> {
        // Only the synced prefix is externally visible.
        let count = self.sync_index() as usize;
        if count == 0 {
            cursor.complete();
            return Ok(());
        }

        let backward = query.direction == Direction::Backward;
        let max_index = count - 1;
        let key = if backward {
            query.upperbound.value()
        } else {
            query.lowerbound.value()
        };

        let bbox = self.header().bbox();
        let mut begin: usize = 0;
        let mut end: usize = max_index;
        let probe_index: usize;

        if key >= bbox.min_timestamp() && key <= bbox.max_timestamp() {
            // Phase A: interpolation narrowing, bounded by a fixed quota.
            let mut lower_val = bbox.min_timestamp();
            let mut upper_val = bbox.max_timestamp();
            let mut quota = INTERPOLATION_SEARCH_QUOTA;

            while quota > 0 && end - begin >= INTERPOLATION_SEARCH_CUTOFF && upper_val > lower_val
            {
                quota -= 1;
                // widened arithmetic: the numerator can exceed 64 bits for
                // wall-clock timestamp spans
                let span = (end - begin) as i128;
                let distance = (key - lower_val) as i128;
                let probe = begin as i128 + distance * span / (upper_val - lower_val) as i128;
                if probe <= begin as i128 || probe >= end as i128 {
                    break;
                }

                let probe = probe as usize;
                let (probe_ts, _) = self.entry_key(probe)?;
                if probe_ts < key {
                    begin = probe + 1;
                    lower_val = self.entry_key(begin)?.0;
                } else {
                    end = probe - 1;
                    upper_val = self.entry_key(end)?.0;
                }
            }

            // Phase B: midpoint bisection with signed indices.
            let mut lo = begin as i64;
            let mut hi = end as i64;
            let mut found = begin;
            while lo <= hi {
                let mid = lo + (hi - lo) / 2;
                found = mid as usize;
                let (mid_ts, _) = self.entry_key(found)?;
                if mid_ts == key {
                    break;
                }
                if mid_ts < key {
                    lo = mid + 1;
                } else {
                    hi = mid - 1;
                }
            }

            // Bisection lands somewhere inside an equal-timestamp run;
            // rewind to its edge so boundary duplicates are not skipped.
            if backward {
                while found < max_index && self.entry_key(found + 1)?.0 <= key {
                    found += 1;
                }
            } else {
                while found > 0 && self.entry_key(found - 1)?.0 >= key {
                    found -= 1;
                }
            }
            probe_index = found;
        } else if key > bbox.max_timestamp() {
            if backward {
                probe_index = end;
            } else {
                cursor.complete();
                return Ok(());
            }
        } else if backward {
            // key below every timestamp in the page
            cursor.complete();
            return Ok(());
        } else {
            probe_index = begin;
        }

        // Phase C: linear scan with the parameter and range filter.
        let lower = query.lowerbound.value();
        let upper = query.upperbound.value();
        let mut index = probe_index;

        if backward {
            loop {
                let offset = self.offset_at(index);
                let (ts, param) = self.entry_key(index)?;
                if param == query.param && ts >= lower && ts <= upper {
                    let delivered = cursor.put(CursorResult {
                        offset,
                        param_id: param,
                        timestamp: Timestamp(ts),
                    });
                    if !delivered {
                        return Ok(());
                    }
                }
                if ts < lower || index == 0 {
                    cursor.complete();
                    return Ok(());
                }
                index -= 1;
            }
        } else {
            loop {
                let offset = self.offset_at(index);
                let (ts, param) = self.entry_key(index)?;
                if param == query.param && ts >= lower && ts <= upper {
                    let delivered = cursor.put(CursorResult {
                        offset,
                        param_id: param,
                        timestamp: Timestamp(ts),
                    });
                    if !delivered {
                        return Ok(());
                    }
                }
                if ts > upper || index == max_index {
                    cursor.complete();
                    return Ok(());
                }
                index += 1;
            }
        }
    }
}

/// Mutable access to a page buffer: the append path, index maintenance and
/// epoch transitions.
#[derive(Debug)]
pub struct PageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> PageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Result<Self> {
        let header = PageHeader::from_bytes(data)?;
        header.validate(data.len())?;
        Ok(Self { data })
    }

    /// Writes a fresh header over `data`, producing an empty page.
    pub fn format(data: &'a mut [u8], page_type: PageType, page_id: u32) -> Result<Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "page buffer of {} bytes cannot hold a header",
            data.len()
        );
        ensure!(
            data.len() <= u32::MAX as usize,
            "page buffer of {} bytes exceeds the offset range",
            data.len()
        );
        ensure!(
            page_type != PageType::Unknown,
            "cannot format a page of unknown type"
        );

        let header = PageHeader::new(page_type, page_id, data.len());
        data[..PAGE_HEADER_SIZE].copy_from_slice(header.as_bytes());
        Ok(Self { data })
    }

    pub fn as_view(&self) -> PageView<'_> {
        PageView { data: self.data }
    }

    pub fn header(&self) -> &PageHeader {
        PageHeader::ref_from_bytes(&self.data[..PAGE_HEADER_SIZE]).expect("validated page header")
    }

    pub fn header_mut(&mut self) -> &mut PageHeader {
        PageHeader::mut_from_bytes(&mut self.data[..PAGE_HEADER_SIZE])
            .expect("validated page header")
    }

    /// Appends a record assembled in place from its components. Returns the
    /// offset the record was written to.
    pub fn add_entry(
        &mut self,
        param_id: ParamId,
        timestamp: Timestamp,
        payload: &[u8],
    ) -> Result<EntryOffset, WriteError> {
        let record_len = ENTRY_HEADER_SIZE + payload.len();
        let start = self.reserve(record_len)?;

        let header = EntryHeader::new(param_id, timestamp, payload.len());
        self.data[start..start + ENTRY_HEADER_SIZE].copy_from_slice(header.as_bytes());
        self.data[start + ENTRY_HEADER_SIZE..start + record_len].copy_from_slice(payload);

        Ok(self.commit_append(start, param_id, timestamp))
    }

    /// Appends a pre-serialized record. The embedded length field is
    /// authoritative and must match the buffer exactly.
    pub fn add_record(&mut self, record: &[u8]) -> Result<EntryOffset, WriteError> {
        let header = EntryHeader::from_bytes(record).map_err(|_| WriteError::BadData)?;
        let length = header.length() as usize;
        if length < ENTRY_HEADER_SIZE || length != record.len() {
            return Err(WriteError::BadData);
        }
        let param_id = header.param_id();
        let timestamp = header.timestamp();

        let start = self.reserve(length)?;
        self.data[start..start + length].copy_from_slice(record);

        Ok(self.commit_append(start, param_id, timestamp))
    }

    /// Checks space for a record plus its index slot and returns the heap
    /// offset the record will occupy. The page is untouched on failure.
    fn reserve(&self, record_len: usize) -> Result<usize, WriteError> {
        let required = record_len + INDEX_SLOT_SIZE;
        if required > self.header().free_space() {
            return Err(WriteError::Overflow);
        }
        Ok(self.header().last_offset() as usize - record_len)
    }

    /// Publishes a record already copied to `start`: heap pointer, index
    /// slot, then the count (slot before count, so a concurrent reader
    /// never sees an unwritten slot), then the bounding box.
    fn commit_append(&mut self, start: usize, param_id: ParamId, timestamp: Timestamp) -> EntryOffset {
        let offset = start as EntryOffset;
        let count = self.header().count() as usize;

        let slot = PAGE_HEADER_SIZE + count * INDEX_SLOT_SIZE;
        self.data[slot..slot + INDEX_SLOT_SIZE].copy_from_slice(&offset.to_le_bytes());

        let header = self.header_mut();
        header.last_offset = U32::new(offset);
        header.count = U32::new(count as u32 + 1);
        header.bbox.update(param_id, timestamp);

        offset
    }

    fn sort_key(&self, offset: EntryOffset) -> (i64, ParamId) {
        // corrupt records sort last
        let Some(bytes) = self.data.get(offset as usize..) else {
            return (i64::MAX, ParamId::MAX);
        };
        match EntryHeader::from_bytes(bytes) {
            Ok(header) => (header.timestamp().value(), header.param_id()),
            Err(_) => (i64::MAX, ParamId::MAX),
        }
    }

    /// Reorders the whole index by `(timestamp, param_id)` and publishes it.
    /// Insertion sort: the expected disorder window is small, bounded by
    /// the TTL and by client send order.
    pub fn sort(&mut self) {
        let count = self.header().count() as usize;
        if count > 1 {
            let mut offsets: Vec<EntryOffset> = {
                let view = self.as_view();
                (0..count).map(|i| view.offset_at(i)).collect()
            };

            for i in 1..count {
                let current = offsets[i];
                let key = self.sort_key(current);
                let mut j = i;
                while j > 0 && self.sort_key(offsets[j - 1]) > key {
                    offsets[j] = offsets[j - 1];
                    j -= 1;
                }
                offsets[j] = current;
            }

            for (i, offset) in offsets.iter().enumerate() {
                let slot = PAGE_HEADER_SIZE + i * INDEX_SLOT_SIZE;
                self.data[slot..slot + INDEX_SLOT_SIZE].copy_from_slice(&offset.to_le_bytes());
            }
        }

        // a fully sorted index is the externally visible order
        self.header_mut().sync_index = U32::new(count as u32);
    }

    /// Mirrors externally-sorted offsets into the index at the sync
    /// position, clamped so the write never exceeds `count`. Returns how
    /// many offsets were applied.
    pub fn sync_indexes(&mut self, offsets: &[EntryOffset]) -> usize {
        let count = self.header().count() as usize;
        let sync = self.header().sync_index() as usize;
        let applied = offsets.len().min(count - sync);

        for (i, &offset) in offsets[..applied].iter().enumerate() {
            let slot = PAGE_HEADER_SIZE + (sync + i) * INDEX_SLOT_SIZE;
            self.data[slot..slot + INDEX_SLOT_SIZE].copy_from_slice(&offset.to_le_bytes());
        }

        self.header_mut().sync_index = U32::new((sync + applied) as u32);
        applied
    }

    pub fn reuse(&mut self) {
        self.header_mut().reuse();
    }

    pub fn close(&mut self) {
        self.header_mut().close();
    }
}
