//! One memory-mapped volume: a page file plus its staging cache.
//!
//! A volume owns the mapping of a single fixed-size page file and the
//! cache that stages appended offsets until the background worker mirrors
//! them into the page index. The page bytes sit behind a `RwLock`: the
//! append path and the worker take write guards, search producers take
//! read guards, which also serializes appends per volume.

use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use parking_lot::{Mutex, RwLock};

use crate::cache::Cache;
use crate::error::WriteError;
use crate::storage::{PageMut, PageType, PageView, VolumeFile};
use crate::types::{EntryOffset, ParamId, TimeDuration, Timestamp};

pub struct Volume {
    path: PathBuf,
    file: RwLock<VolumeFile>,
    cache: Mutex<Cache>,
    max_cache_size: usize,
}

impl Volume {
    /// Creates a formatted, empty volume file on disk.
    pub fn create<P: AsRef<Path>>(path: P, size: usize, page_id: u32) -> Result<()> {
        let mut file = VolumeFile::create(&path, size)?;
        PageMut::format(file.as_mut_slice(), PageType::Index, page_id)?;
        file.sync()
    }

    /// Maps an existing volume file and validates the page living at its
    /// base. A violated header is a fatal construction error.
    pub fn open<P: AsRef<Path>>(path: P, ttl: TimeDuration, max_cache_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = VolumeFile::open(path)?;
        PageView::new(file.as_slice())
            .wrap_err_with(|| format!("volume '{}' holds no valid page", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            cache: Mutex::new(Cache::new(ttl, max_cache_size)),
            max_cache_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against a read-only view of the page.
    pub fn with_page<R>(&self, f: impl FnOnce(PageView<'_>) -> R) -> Result<R> {
        let guard = self.file.read();
        let view = PageView::new(guard.as_slice())?;
        Ok(f(view))
    }

    /// Runs `f` against the mutable page. Exclusive with readers and with
    /// other writers.
    pub fn with_page_mut<R>(&self, f: impl FnOnce(&mut PageMut<'_>) -> R) -> Result<R> {
        let mut guard = self.file.write();
        let mut page = PageMut::new(guard.as_mut_slice())?;
        Ok(f(&mut page))
    }

    pub fn epoch_counters(&self) -> Result<(u32, u32)> {
        self.with_page(|page| {
            let header = page.header();
            (header.open_count(), header.close_count())
        })
    }

    /// Appends one sample assembled from its components. The staging of
    /// the returned offset is the caller's responsibility.
    pub fn append(&self, param_id: ParamId, timestamp: Timestamp, payload: &[u8]) -> Result<EntryOffset> {
        self.with_page_mut(|page| page.add_entry(param_id, timestamp, payload))?
            .map_err(eyre::Report::new)
    }

    /// Appends one pre-serialized record.
    pub fn append_record(&self, record: &[u8]) -> Result<EntryOffset> {
        self.with_page_mut(|page| page.add_record(record))?
            .map_err(eyre::Report::new)
    }

    /// Stages an appended offset. Returns how many cache generations
    /// became drain-ready.
    pub fn stage(&self, timestamp: Timestamp, param_id: ParamId, offset: EntryOffset) -> usize {
        self.cache.lock().add(timestamp, param_id, offset)
    }

    /// Seals every live cache generation; returns how many became
    /// drain-ready.
    pub fn seal_cache(&self) -> usize {
        self.cache.lock().seal()
    }

    /// Mirrors one sealed cache generation into the page index. `Ok(false)`
    /// means nothing was sealed; the caller should retry after the next
    /// seal. The generation is popped under the page lock, so a concurrent
    /// `reuse` can never interleave a recycled page with a stale drain.
    pub fn drain_staged(&self) -> Result<bool> {
        let mut buffer: Vec<EntryOffset> = vec![0; self.max_cache_size];

        let mut guard = self.file.write();
        let mut page = PageMut::new(guard.as_mut_slice())?;
        let drained = match self.cache.lock().pick_last(&mut buffer) {
            Some(n) => n,
            None => return Ok(false),
        };
        page.sync_indexes(&buffer[..drained]);
        Ok(true)
    }

    /// Throws the page content away and formats a fresh one, preserving
    /// the page identity and its epoch counters.
    pub fn reallocate(&self) -> Result<()> {
        let mut guard = self.file.write();

        let (page_type, page_id, open_count, close_count) = {
            let view = PageView::new(guard.as_slice())?;
            let header = view.header();
            (
                header.page_type(),
                header.page_id(),
                header.open_count(),
                header.close_count(),
            )
        };

        guard.remap_destructive()?;
        let mut page = PageMut::format(guard.as_mut_slice(), page_type, page_id)?;
        let header = page.header_mut();
        header.set_open_count(open_count);
        header.set_close_count(close_count);
        Ok(())
    }

    /// Begins a new page epoch and flushes the mapping. Anything still
    /// staged points into the discarded epoch and is dropped with it.
    pub fn reuse(&self) -> Result<()> {
        let mut guard = self.file.write();
        PageMut::new(guard.as_mut_slice())?.reuse();
        self.cache.lock().clear();
        guard.sync()
    }

    /// Ends the page epoch: bumps the close counter, flushes, and seals
    /// the staging cache so the tail of staged offsets stays drainable.
    /// Returns how many cache generations became drain-ready.
    pub fn close(&self) -> Result<usize> {
        {
            let mut guard = self.file.write();
            PageMut::new(guard.as_mut_slice())?.close();
            guard.sync()?;
        }
        Ok(self.seal_cache())
    }

    pub fn flush(&self) -> Result<()> {
        self.file.read().sync()
    }

    /// Hints the kernel that the volume is about to be scanned.
    pub fn prefetch(&self) {
        self.file.read().prefetch()
    }
}

/// Typed write failure carried by a report, if any. Overflow drives the
/// engine's rotation; everything else propagates.
pub fn write_error_of(report: &eyre::Report) -> Option<WriteError> {
    report.downcast_ref::<WriteError>().copied()
}
