//! Top-level storage engine: the round-robin ring of volumes.
//!
//! Exactly one volume is active at any instant; writes append into its page
//! and stage the resulting offset in its cache. When the active page
//! overflows, the ring rotates: the full volume is closed and the next one
//! is destructively recycled for a new epoch. A background worker drains
//! sealed cache generations into the page indexes, growing the prefix that
//! searches traverse.
//!
//! Crash recovery rests on the per-page `(open_count, close_count)` pair:
//! the most recently opened page has the maximal open count, and equality
//! of the two counters means the process stopped between closing one page
//! and opening the next.

use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use eyre::{Result, WrapErr};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::config::StorageConfig;
use crate::cursor::{CursorHandle, FanInCursor, InternalCursor};
use crate::error::{StatusCode, WriteError};
use crate::meta::Manifest;
use crate::query::SearchQuery;
use crate::storage::{EntryHeader, ENTRY_HEADER_SIZE, INDEX_SLOT_SIZE, PAGE_HEADER_SIZE};
use crate::types::{EntryOffset, ParamId, Timestamp};
use crate::volume::{write_error_of, Volume};

struct DrainQueue {
    queue: VecDeque<usize>,
    /// Bumped on every signal; a failed drain waits for the next epoch
    /// instead of spinning on the same queue item.
    epoch: u64,
    stop: bool,
}

struct Shared {
    volumes: Vec<Arc<Volume>>,
    active: AtomicUsize,
    /// Rotation linearization point. The atomic `active` load outside this
    /// mutex is a fast-path filter only.
    ring: Mutex<()>,
    drain: Mutex<DrainQueue>,
    drain_cv: Condvar,
}

pub struct Storage {
    shared: Arc<Shared>,
    /// Largest record an empty page can hold.
    record_capacity: usize,
    worker: Option<JoinHandle<()>>,
}

impl Storage {
    /// Creates the on-disk layout of a new storage: `num_volumes` formatted
    /// page files plus the manifest. The first page is opened so a fresh
    /// storage carries exactly one live epoch.
    pub fn create(config: &StorageConfig) -> Result<()> {
        config.validate()?;
        fs::create_dir_all(&config.volumes_path).wrap_err_with(|| {
            format!(
                "failed to create volumes directory '{}'",
                config.volumes_path.display()
            )
        })?;

        let mut created: Vec<std::path::PathBuf> = Vec::new();
        for index in 0..config.num_volumes {
            let path = config.volume_path(index);
            if let Err(report) = Volume::create(&path, config.volume_size, index) {
                error!(volume = index, error = %report, "volume creation failed, cleaning up");
                for path in &created {
                    if let Err(cleanup) = fs::remove_file(path) {
                        warn!(path = %path.display(), error = %cleanup, "cleanup failed");
                    }
                }
                return Err(report);
            }
            created.push(path);
        }

        {
            let first = Volume::open(&created[0], config.ttl, config.max_cache_size)?;
            first.reuse()?;
        }

        Manifest::new(&created).store(config.manifest_path())
    }

    /// Opens an existing storage: loads and validates the manifest, maps
    /// every volume, selects the active one, and starts the sync worker.
    pub fn open(config: &StorageConfig) -> Result<Storage> {
        config.validate()?;
        let manifest = Manifest::load(config.manifest_path())?;

        let mut volumes = Vec::with_capacity(manifest.num_volumes as usize);
        for path in manifest.volume_paths() {
            volumes.push(Arc::new(Volume::open(
                &path,
                config.ttl,
                config.max_cache_size,
            )?));
        }

        let shared = Arc::new(Shared {
            volumes,
            active: AtomicUsize::new(0),
            ring: Mutex::new(()),
            drain: Mutex::new(DrainQueue {
                queue: VecDeque::new(),
                epoch: 0,
                stop: false,
            }),
            drain_cv: Condvar::new(),
        });

        select_active_volume(&shared)?;

        let record_capacity = shared.volumes[0].with_page(|page| {
            page.header().length() as usize - PAGE_HEADER_SIZE - INDEX_SLOT_SIZE
        })?;

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::spawn(move || run_worker(worker_shared));

        Ok(Storage {
            shared,
            record_capacity,
            worker: Some(worker),
        })
    }

    /// Appends one sample assembled from its components.
    pub fn write(&self, param_id: ParamId, timestamp: Timestamp, payload: &[u8]) -> Result<()> {
        self.write_impl(param_id, timestamp, ENTRY_HEADER_SIZE + payload.len(), |volume| {
            volume.append(param_id, timestamp, payload)
        })
    }

    /// Appends one pre-serialized record.
    pub fn write_record(&self, record: &[u8]) -> Result<()> {
        let header = EntryHeader::from_bytes(record)
            .map_err(|_| eyre::Report::new(WriteError::BadData))?;
        self.write_impl(header.param_id(), header.timestamp(), record.len(), |volume| {
            volume.append_record(record)
        })
    }

    fn write_impl<F>(
        &self,
        param_id: ParamId,
        timestamp: Timestamp,
        record_len: usize,
        append: F,
    ) -> Result<()>
    where
        F: Fn(&Volume) -> Result<EntryOffset>,
    {
        // a record no empty page can hold must not rotate the whole ring
        if record_len > self.record_capacity {
            return Err(eyre::Report::new(WriteError::Overflow));
        }

        // one full lap around the ring bounds the retries
        let attempts = self.shared.volumes.len() + 1;
        for _ in 0..attempts {
            let rev = self.shared.active.load(Ordering::Acquire);
            let volume = &self.shared.volumes[rev];

            match append(volume) {
                Ok(offset) => {
                    let ready = volume.stage(timestamp, param_id, offset);
                    if ready > 0 {
                        self.schedule_drain(rev, ready);
                    }
                    return Ok(());
                }
                Err(report) => match write_error_of(&report) {
                    Some(WriteError::Overflow) => {
                        debug!(volume = rev, "active page overflowed, rotating");
                        self.advance_volume(rev)?;
                    }
                    _ => return Err(report),
                },
            }
        }
        Err(eyre::Report::new(WriteError::Overflow))
    }

    /// Rotates the ring away from `rev`. A stale `rev` means another
    /// writer already rotated; the mismatch is silently absorbed and the
    /// caller retries.
    fn advance_volume(&self, rev: usize) -> Result<()> {
        let shared = &self.shared;
        let _ring = shared.ring.lock();

        if shared.active.load(Ordering::Acquire) != rev {
            return Ok(());
        }

        let sealed = shared.volumes[rev].close()?;
        if sealed > 0 {
            self.schedule_drain(rev, sealed);
        }

        let next = (rev + 1) % shared.volumes.len();
        shared.volumes[next].reallocate()?;
        shared.volumes[next].reuse()?;
        shared.active.store(next, Ordering::Release);
        debug!(from = rev, to = next, "rotated active volume");
        Ok(())
    }

    fn schedule_drain(&self, volume: usize, times: usize) {
        let mut drain = self.shared.drain.lock();
        for _ in 0..times {
            drain.queue.push_back(volume);
        }
        drain.epoch += 1;
        drop(drain);
        self.shared.drain_cv.notify_one();
    }

    /// Fans the query out to every volume's page, one producer task per
    /// volume, and merges the per-page streams in the query's direction.
    /// The engine filters nothing itself; filtering lives in the page scan.
    pub fn search(&self, query: SearchQuery) -> FanInCursor {
        let direction = query.direction;
        let sources = self
            .shared
            .volumes
            .iter()
            .map(|volume| {
                let volume = Arc::clone(volume);
                CursorHandle::spawn(move |sink| {
                    volume.prefetch();
                    let searched = volume.with_page(|page| page.search(&query, &mut *sink));
                    if searched.is_err() {
                        sink.set_error(StatusCode::Io);
                    }
                })
            })
            .collect();
        FanInCursor::new(sources, direction)
    }

    /// Seals every volume's staging cache and drains it synchronously, so
    /// all accepted writes become visible to searches, then flushes the
    /// mappings.
    pub fn flush(&self) -> Result<()> {
        for volume in self.shared.volumes.iter() {
            volume.seal_cache();
            while volume.drain_staged()? {}
            volume.flush()?;
        }
        Ok(())
    }

    pub fn active_volume_index(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn volume_count(&self) -> usize {
        self.shared.volumes.len()
    }

    /// `(open_count, close_count)` of one volume's page.
    pub fn epoch_counters(&self, volume: usize) -> Result<(u32, u32)> {
        self.shared.volumes[volume].epoch_counters()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        {
            let mut drain = self.shared.drain.lock();
            drain.stop = true;
            drain.epoch += 1;
        }
        self.shared.drain_cv.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Chooses the startup volume: maximal `open_count`, ties to the highest
/// index. Equal counters mean the previous run stopped between closing
/// this page and opening the next; the ring advances once, without closing
/// the already-closed page a second time.
fn select_active_volume(shared: &Shared) -> Result<()> {
    let mut selected = 0usize;
    let mut max_opens = -1i64;
    for (index, volume) in shared.volumes.iter().enumerate() {
        let (open_count, _) = volume.epoch_counters()?;
        if i64::from(open_count) >= max_opens {
            max_opens = i64::from(open_count);
            selected = index;
        }
    }

    let (open_count, close_count) = shared.volumes[selected].epoch_counters()?;
    if open_count == close_count {
        let next = (selected + 1) % shared.volumes.len();
        shared.volumes[next].reallocate()?;
        shared.volumes[next].reuse()?;
        shared.active.store(next, Ordering::Release);
        debug!(from = selected, to = next, "resumed ring past a closed page");
    } else {
        shared.active.store(selected, Ordering::Release);
        debug!(volume = selected, "selected active volume");
    }
    Ok(())
}

fn run_worker(shared: Arc<Shared>) {
    let mut drain = shared.drain.lock();
    loop {
        while drain.queue.is_empty() && !drain.stop {
            shared.drain_cv.wait(&mut drain);
        }
        if drain.stop {
            return;
        }
        let Some(volume_idx) = drain.queue.pop_front() else {
            continue;
        };
        let epoch = drain.epoch;
        drop(drain);

        let retry = match shared.volumes[volume_idx].drain_staged() {
            Ok(true) => false,
            Ok(false) => true,
            Err(report) => {
                warn!(volume = volume_idx, error = %report, "background index sync failed");
                true
            }
        };

        drain = shared.drain.lock();
        if retry {
            // leave the item queued; retry on the next signal
            drain.queue.push_back(volume_idx);
            while drain.epoch == epoch && !drain.stop {
                shared.drain_cv.wait(&mut drain);
            }
        }
    }
}
