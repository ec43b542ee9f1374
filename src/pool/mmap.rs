//! # Memory-Mapped Pool File
//!
//! `MmapPool` is the lowest layer of the persistent substrate: one file
//! mapped read-write into the process address space. Everything above it
//! (header, allocator, transactions) addresses the pool by byte offset.
//!
//! ## Design
//!
//! Persistent memory is byte-addressable, so unlike a page-oriented store
//! the pool exposes raw byte ranges rather than fixed pages. The mapping is
//! created once at open and never remapped: pool files have a fixed size
//! for their whole lifetime, which means a `&[u8]` borrowed from the pool
//! can only be invalidated by dropping the pool itself - enforced by the
//! borrow checker, with zero runtime bookkeeping.
//!
//! ## Durability
//!
//! `flush` / `flush_async` / `flush_range` expose the msync family. On real
//! persistent memory the store-fence discipline would replace msync; the
//! call sites are the same, so the transaction layer owns the policy (see
//! [`super::SyncMode`]) and this layer just executes it.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

#[derive(Debug)]
pub struct MmapPool {
    _file: File,
    mmap: MmapMut,
    len: u64,
}

impl MmapPool {
    /// Maps an existing pool file at its current size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open pool file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat pool file '{}'", path.display()))?
            .len();

        ensure!(len > 0, "cannot open empty pool file '{}'", path.display());

        // SAFETY: MmapMut::map_mut is unsafe because externally-modified
        // files lead to undefined behavior. This is safe because:
        // 1. The file is opened read+write and owned by this process
        // 2. Pool files are not shared with other processes
        // 3. The mmap lifetime is tied to MmapPool, preventing use-after-unmap
        // 4. All access goes through bytes()/bytes_mut() which bounds-check
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            _file: file,
            mmap,
            len,
        })
    }

    /// Creates (or truncates) a pool file of exactly `size` bytes and maps it.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref();

        ensure!(size > 0, "pool size must be non-zero");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create pool file '{}'", path.display()))?;

        file.set_len(size)
            .wrap_err_with(|| format!("failed to size pool file to {} bytes", size))?;

        // SAFETY: see open(). Additionally the file was just created with
        // truncate=true, so no stale mapping of it can exist.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            _file: file,
            mmap,
            len: size,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        self.check_range(offset, len)?;
        let offset = offset as usize;
        Ok(&self.mmap[offset..offset + len])
    }

    pub fn bytes_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        self.check_range(offset, len)?;
        let offset = offset as usize;
        Ok(&mut self.mmap[offset..offset + len])
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| eyre::eyre!("pool range overflows: offset={} len={}", offset, len))?;
        ensure!(
            end <= self.len,
            "pool range {}..{} out of bounds (pool size {})",
            offset,
            end,
            self.len
        );
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync pool to disk")
    }

    pub fn flush_async(&self) -> Result<()> {
        self.mmap
            .flush_async()
            .wrap_err("failed to schedule pool writeback")
    }

    pub fn flush_range(&self, offset: u64, len: usize) -> Result<()> {
        self.check_range(offset, len)?;
        self.mmap
            .flush_range(offset as usize, len)
            .wrap_err("failed to sync pool range to disk")
    }

    /// Hints the kernel to fault in `offset..offset+len` ahead of a
    /// sequential walk. Out-of-range requests are clamped, not errors.
    pub fn prefetch(&self, offset: u64, len: usize) {
        if offset >= self.len {
            return;
        }
        let len = len.min((self.len - offset) as usize);

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a hint; the range was
        // clamped to the mapping above, so the pointer arithmetic stays
        // inside the mmap region.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().add(offset as usize) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_reopen_preserves_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.pool");

        {
            let mut pool = MmapPool::create(&path, 4096).unwrap();
            pool.bytes_mut(100, 5).unwrap().copy_from_slice(b"hello");
            pool.flush().unwrap();
        }

        let pool = MmapPool::open(&path).unwrap();
        assert_eq!(pool.len(), 4096);
        assert_eq!(pool.bytes(100, 5).unwrap(), b"hello");
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let dir = tempdir().unwrap();
        let pool = MmapPool::create(dir.path().join("test.pool"), 1024).unwrap();

        assert!(pool.bytes(1020, 8).is_err());
        assert!(pool.bytes(u64::MAX, 8).is_err());
        assert!(pool.bytes(0, 1024).is_ok());
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(MmapPool::open(dir.path().join("absent.pool")).is_err());
    }
}
