//! # Persistent Pool Substrate
//!
//! The pool is nvkv's stand-in for a persistent-memory object store: one
//! memory-mapped file holding a validated header, a fixed undo-log region,
//! and a heap of durably allocated blocks addressed by [`PAddr`] offsets.
//!
//! ## What the engines get from it
//!
//! - A typed **root object**: one durable pointer slot in the header,
//!   published atomically from inside a transaction.
//! - **Durable allocation**: [`PoolTxn::alloc`] / [`PoolTxn::free`] of raw
//!   byte blocks that survive restart.
//! - A scoped **durable transaction**: [`Pool::txn`] runs a closure in
//!   which every mutation is undo-logged; the closure's `Err` return (or a
//!   crash at any point) rolls all of them back, and `Ok` commits them
//!   together.
//!
//! ## Crash-Consistency Argument
//!
//! Before the first write of any byte range inside a transaction, the old
//! bytes are appended to the undo log. The log's `used` cursor is bumped
//! only after a record is fully written, so a torn append is invisible.
//! On open, a log left in the active state is replayed in reverse,
//! restoring the exact pre-transaction image. Within one process lifetime,
//! an error return from the transaction closure takes the same replay
//! path.
//!
//! ## Flush Policy
//!
//! [`SyncMode`] selects what happens at commit: `Full` blocks on msync,
//! `Normal` schedules asynchronous writeback, `Off` leaves writeback to
//! the OS. On real persistent memory the same call sites would issue
//! store fences; the transaction discipline is what carries correctness.

mod alloc;
mod header;
mod mmap;
mod txn;

pub use header::{PAddr, PoolHeader, CURRENT_VERSION, POOL_MAGIC};
pub use mmap::MmapPool;
pub use txn::PoolTxn;

use std::path::Path;

use eyre::{ensure, Result};
use tracing::debug;

use crate::config::{MIN_POOL_SIZE, POOL_HEADER_SIZE};

/// Flush policy applied at transaction commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Block until every commit's writes reach stable media.
    Full,
    /// Let the OS write back between commits; flush once when the pool
    /// closes.
    #[default]
    Normal,
    /// Never flush automatically.
    Off,
}

/// An open pool file.
#[derive(Debug)]
pub struct Pool {
    pub(super) mmap: MmapPool,
    pub(super) layout: String,
    pub(super) sync: SyncMode,
}

impl Pool {
    /// Opens the pool at `path`, creating it at `size` bytes if the file
    /// does not exist. An existing pool is opened at its recorded size; the
    /// supplied `size` is ignored, and its layout tag must match.
    pub fn open(path: &Path, layout: &str, size: u64, sync: SyncMode) -> Result<Self> {
        if path.exists() {
            debug!(path = %path.display(), layout, "opening pool");
            let mmap = MmapPool::open(path)?;
            let mut pool = Self {
                mmap,
                layout: layout.to_string(),
                sync,
            };
            // Validates magic, version, and layout tag.
            let recorded = pool.header()?.pool_size();
            ensure!(
                recorded == pool.mmap.len(),
                "pool file '{}' is {} bytes but header records {}",
                path.display(),
                pool.mmap.len(),
                recorded
            );
            pool.recover_log()?;
            Ok(pool)
        } else {
            Self::create(path, layout, size, sync)
        }
    }

    /// Creates a fresh pool of exactly `size` bytes, truncating any
    /// existing file at `path`.
    pub fn create(path: &Path, layout: &str, size: u64, sync: SyncMode) -> Result<Self> {
        ensure!(
            size >= MIN_POOL_SIZE,
            "pool size {} below minimum {}",
            size,
            MIN_POOL_SIZE
        );
        debug!(path = %path.display(), layout, size, "creating pool");

        let mut mmap = MmapPool::create(path, size)?;

        let header = PoolHeader::new(layout, size)?;
        mmap.bytes_mut(0, POOL_HEADER_SIZE)?
            .copy_from_slice(zerocopy::IntoBytes::as_bytes(&header));

        let mut pool = Self {
            mmap,
            layout: layout.to_string(),
            sync,
        };
        pool.log_reset()?;
        pool.mmap.flush()?;
        Ok(pool)
    }

    pub fn header(&self) -> Result<&PoolHeader> {
        PoolHeader::from_bytes(self.mmap.bytes(0, POOL_HEADER_SIZE)?, &self.layout)
    }

    pub(super) fn header_mut(&mut self) -> Result<&mut PoolHeader> {
        let layout = self.layout.clone();
        PoolHeader::from_bytes_mut(self.mmap.bytes_mut(0, POOL_HEADER_SIZE)?, &layout)
    }

    /// The pool's root object: a single durable pointer.
    pub fn root(&self) -> Result<PAddr> {
        Ok(self.header()?.root())
    }

    /// Borrows `len` bytes starting at `addr`. The slice is valid until the
    /// pool is dropped; callers must not hand it across a mutation.
    pub fn bytes(&self, addr: PAddr, len: usize) -> Result<&[u8]> {
        self.mmap.bytes(addr.get(), len)
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        let bytes = self.mmap.bytes(offset, 8)?;
        Ok(u64::from_ne_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// Hints the kernel that the heap is about to be walked sequentially.
    pub fn prefetch_heap(&self) {
        let base = crate::config::HEAP_BASE;
        if let Ok(header) = self.header() {
            self.mmap
                .prefetch(base, (header.heap_top().saturating_sub(base)) as usize);
        }
    }

    /// Runs `f` as a durable transaction. All pool mutations made through
    /// the [`PoolTxn`] handle commit together when `f` returns `Ok`, and
    /// are rolled back when it returns `Err` (the error is passed through).
    pub fn txn<R>(&mut self, f: impl FnOnce(&mut PoolTxn<'_>) -> Result<R>) -> Result<R> {
        self.log_begin()?;
        let result = {
            let mut tx = PoolTxn::new(self);
            f(&mut tx)
        };
        match result {
            Ok(value) => {
                self.log_commit()?;
                Ok(value)
            }
            Err(err) => {
                self.rollback_log()?;
                Err(err)
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.sync != SyncMode::Off {
            let _ = self.mmap.flush();
        }
    }
}
