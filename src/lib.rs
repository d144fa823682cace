//! # AeonDB - Embedded Time-Series Storage Engine
//!
//! AeonDB is an embedded, append-only storage engine for time-series
//! samples. Samples are tagged by a numeric parameter identifier and a
//! mostly-ordered timestamp, persisted into a ring of fixed-size
//! memory-mapped volumes, and served back through single-parameter range
//! queries over streaming cursors.
//!
//! ## Quick Start
//!
//! ```ignore
//! use aeondb::{Direction, SearchQuery, Storage, StorageConfig, Timestamp};
//!
//! let config = StorageConfig::new("./data", "metrics");
//! Storage::create(&config)?;
//! let storage = Storage::open(&config)?;
//!
//! storage.write(42, Timestamp::now(), b"sample payload")?;
//! storage.flush()?;
//!
//! let query = SearchQuery::new(42, Timestamp::MIN, Timestamp::MAX, Direction::Forward)?;
//! let mut cursor = storage.search(query);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │         Public API (Storage)         │
//! ├──────────────────────────────────────┤
//! │  Volume Ring │ Sync Worker │ Search  │
//! ├──────────────┴─────────────┴─────────┤
//! │   Cursor Bridge + Fan-In Merger      │
//! ├──────────────────────────────────────┤
//! │  Page (header / index / record heap) │
//! ├──────────────────────────────────────┤
//! │     Memory-Mapped Volume Files       │
//! └──────────────────────────────────────┘
//! ```
//!
//! Writes append into the active volume's page and stage the new offset in
//! that volume's TTL cache; a background worker later mirrors sorted
//! offset runs into the page index, which is the only region searches
//! traverse. When a page fills, the ring rotates to the next volume and
//! recycles it. Queries fan out to every volume, one producer task per
//! page, and a fan-in merger yields the globally ordered stream.
//!
//! ## Durability Model
//!
//! Volumes are `mmap`ed read/write and flushed on epoch transitions.
//! Samples that have not yet been sync-indexed are invisible to searches
//! and are not durable across a crash; everything below the page's sync
//! position survives and is recovered by the `(open_count, close_count)`
//! epoch counters at startup.
//!
//! ## Module Overview
//!
//! - [`storage`]: memory-mapped files, record format, page layout/search
//! - [`cursor`]: producer/consumer streaming protocol and the fan-in merge
//! - [`cache`]: TTL staging cache feeding the background index sync
//! - [`volume`]: one mapped file plus its cache and page lifecycle
//! - [`engine`]: the volume ring, rotation, worker, fan-out search
//! - [`meta`]: the manifest document naming the volume files

pub mod cache;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod meta;
pub mod query;
pub mod storage;
pub mod types;
pub mod volume;

pub use config::StorageConfig;
pub use cursor::{CursorResult, ExternalCursor, FanInCursor, InternalCursor, RecordingCursor};
pub use engine::Storage;
pub use error::{SearchError, StatusCode, WriteError};
pub use query::{Direction, SearchQuery};
pub use storage::EntryBuf;
pub use types::{EntryOffset, ParamId, TimeDuration, Timestamp};
