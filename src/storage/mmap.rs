//! Memory-mapped volume files.
//!
//! A `VolumeFile` maps one fixed-size page file read/write into the process
//! address space. Page bytes are served as plain slices; the OS page cache
//! does the buffering, so no read ever copies through an intermediate
//! buffer and no cursor operation blocks on explicit I/O.
//!
//! Remapping invalidates previously returned slices, which is why
//! `remap_destructive` takes `&mut self`: the borrow checker proves no page
//! reference survives the remap, with zero runtime cost.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

#[derive(Debug)]
pub struct VolumeFile {
    file: File,
    mmap: MmapMut,
    len: usize,
}

impl VolumeFile {
    /// Maps an existing volume file whole.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open volume file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?;

        let len = metadata.len();

        ensure!(len > 0, "cannot open empty volume file '{}'", path.display());

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally, leading to undefined behavior. This is safe
        // because:
        // 1. The file is opened with read+write access and volume files are
        //    not meant to be touched by external processes
        // 2. The mmap lifetime is tied to VolumeFile, preventing
        //    use-after-unmap
        // 3. All access goes through as_slice()/as_mut_slice() which cover
        //    exactly the mapped length
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            len: len as usize,
        })
    }

    /// Creates a volume file of `size` bytes, truncating any previous
    /// content, and maps it.
    pub fn create<P: AsRef<Path>>(path: P, size: usize) -> Result<Self> {
        let path = path.as_ref();

        ensure!(size > 0, "volume size must be positive");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create volume file '{}'", path.display()))?;

        file.set_len(size as u64)
            .wrap_err_with(|| format!("failed to set volume size to {} bytes", size))?;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally. This is safe because:
        // 1. We just created this file with truncate=true
        // 2. The file size was set before mapping
        // 3. The mmap lifetime is tied to VolumeFile
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self { file, mmap, len: size })
    }

    /// Throws the file content away and maps a zeroed region of the same
    /// size. Requires `&mut self`, so no page slice can outlive the old
    /// mapping.
    pub fn remap_destructive(&mut self) -> Result<()> {
        self.file
            .set_len(0)
            .wrap_err("failed to truncate volume before remap")?;
        self.file
            .set_len(self.len as u64)
            .wrap_err("failed to re-extend volume before remap")?;

        // SAFETY: the old mmap becomes invalid here. This is safe because:
        // 1. remap_destructive() takes &mut self, so no slice references
        //    exist (borrow checker)
        // 2. The file was re-extended to self.len before remapping
        // 3. The old mmap is dropped when the new one is assigned
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file).wrap_err("failed to remap volume after truncation")?
        };

        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Flushes dirty mapped pages to disk.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync volume mmap to disk")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hints the kernel that the whole volume is about to be scanned.
    pub fn prefetch(&self) {
        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a hint and does not cause
        // undefined behavior for a valid region. The region is valid
        // because the mapping covers exactly self.len bytes.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr() as *mut libc::c_void,
                self.len,
                libc::MADV_WILLNEED,
            );
        }
    }
}
