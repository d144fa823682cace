//! # Storage Layer
//!
//! The on-disk substrate of the engine: one memory-mapped file per volume,
//! each containing a single self-describing page. A page is a relocatable
//! record arena with three regions:
//!
//! ```text
//! +---------------------------+  offset 0
//! |   PageHeader (128 bytes)  |
//! +---------------------------+  offset 128
//! |   page_index[0..count)    |  <- 4-byte entry offsets, grows upward
//! +---------------------------+
//! |        free space         |
//! +---------------------------+  last_offset
//! |        record heap        |  <- entries, grows downward
//! +---------------------------+  length
//! ```
//!
//! All multi-byte on-disk integers are little-endian via `zerocopy`, so a
//! volume file is readable across architectures and entry headers can be
//! decoded at unaligned offsets straight out of the mapping.
//!
//! ## Module organization
//!
//! - `mmap`: memory-mapped volume files (`VolumeFile`)
//! - `entry`: the variable-length record format (`Entry`, `EntryHeader`)
//! - `page`: page header, append path, sort/sync, range search

mod entry;
mod mmap;
mod page;

pub use entry::{Entry, EntryBuf, EntryHeader, ENTRY_HEADER_SIZE};
pub use mmap::VolumeFile;
pub use page::{
    PageBoundingBox, PageHeader, PageMut, PageType, PageView, PAGE_MAGIC, PAGE_VERSION,
};

/// Size of one volume file. Every page spans its whole volume.
pub const VOLUME_SIZE: usize = 4 * 1024 * 1024;

/// Fixed prefix of every page, reserved space included.
pub const PAGE_HEADER_SIZE: usize = 128;

/// Size of one `page_index` slot.
pub const INDEX_SLOT_SIZE: usize = std::mem::size_of::<crate::types::EntryOffset>();
