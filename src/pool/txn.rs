//! # Durable Transactions
//!
//! Undo-log transactions over the pool. The log occupies a fixed region
//! after the pool header:
//!
//! ```text
//! Offset (from log base)   Content
//! ----------------------   ---------------------------------------
//! 0                        state: u64 (0 = idle, 1 = active)
//! 8                        used: u64 (record bytes written so far)
//! 16                       records...
//! ```
//!
//! Each record captures the prior contents of one byte range:
//!
//! ```text
//! +-----------------------------+------------------+
//! | UndoRecordHeader (24 bytes) | old bytes (len,  |
//! | offset | len | pad | crc64  |  padded to 8)    |
//! +-----------------------------+------------------+
//! ```
//!
//! ## Append Protocol
//!
//! 1. Copy the record (header + old bytes) into the log tail
//! 2. Bump `used` only after the record is fully written
//!
//! A crash between the two steps leaves the record invisible, so replay
//! never sees a half-written tail. The CRC-64 over (offset, len, payload)
//! is a second line of defense: a record that fails its checksum ends
//! replay.
//!
//! ## Replay
//!
//! Records are applied in reverse append order, so the earliest snapshot
//! of a range - its pre-transaction contents - lands last. Ranges
//! snapshotted more than once are therefore restored correctly without
//! any dedup requirement on the writer side.

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use tracing::{debug, warn};
use zerocopy::native_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{POOL_HEADER_SIZE, UNDO_LOG_SIZE};

use super::header::PAddr;
use super::{Pool, PoolHeader, SyncMode};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

const LOG_BASE: u64 = POOL_HEADER_SIZE as u64;
const LOG_STATE_OFFSET: u64 = LOG_BASE;
const LOG_USED_OFFSET: u64 = LOG_BASE + 8;
const LOG_RECORDS_BASE: u64 = LOG_BASE + 16;
const LOG_CAPACITY: u64 = UNDO_LOG_SIZE as u64 - 16;

const STATE_IDLE: u64 = 0;
const STATE_ACTIVE: u64 = 1;

pub const UNDO_RECORD_HEADER_SIZE: usize = 24;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct UndoRecordHeader {
    offset: U64,
    len: U32,
    _pad: U32,
    checksum: U64,
}

const _: () = assert!(std::mem::size_of::<UndoRecordHeader>() == UNDO_RECORD_HEADER_SIZE);

fn align8(len: u64) -> u64 {
    (len + 7) & !7
}

fn record_checksum(offset: u64, len: u32, old: &[u8]) -> u64 {
    let mut digest = CRC64.digest();
    digest.update(&offset.to_ne_bytes());
    digest.update(&len.to_ne_bytes());
    digest.update(old);
    digest.finalize()
}

impl Pool {
    fn write_word(&mut self, offset: u64, value: u64) -> Result<()> {
        self.mmap
            .bytes_mut(offset, 8)?
            .copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    pub(super) fn log_reset(&mut self) -> Result<()> {
        self.write_word(LOG_STATE_OFFSET, STATE_IDLE)?;
        self.write_word(LOG_USED_OFFSET, 0)?;
        Ok(())
    }

    pub(super) fn log_begin(&mut self) -> Result<()> {
        ensure!(
            self.read_u64(LOG_STATE_OFFSET)? == STATE_IDLE,
            "transaction already active"
        );
        self.write_word(LOG_USED_OFFSET, 0)?;
        self.write_word(LOG_STATE_OFFSET, STATE_ACTIVE)?;
        if self.sync == SyncMode::Full {
            self.mmap.flush_range(LOG_BASE, 16)?;
        }
        Ok(())
    }

    pub(super) fn log_commit(&mut self) -> Result<()> {
        // Full blocks on writeback at every commit; the other modes leave
        // commit-time writeback to the OS and flush when the pool closes.
        if self.sync == SyncMode::Full {
            self.mmap.flush()?;
        }
        self.log_reset()?;
        if self.sync == SyncMode::Full {
            self.mmap.flush_range(LOG_BASE, 16)?;
        }
        Ok(())
    }

    /// Appends one undo record capturing the current bytes of
    /// `offset..offset+len`.
    pub(super) fn log_append(&mut self, offset: u64, len: usize) -> Result<()> {
        debug_assert_eq!(self.read_u64(LOG_STATE_OFFSET).unwrap_or(0), STATE_ACTIVE);

        let record_len = UNDO_RECORD_HEADER_SIZE as u64 + align8(len as u64);
        let used = self.read_u64(LOG_USED_OFFSET)?;
        ensure!(
            used + record_len <= LOG_CAPACITY,
            "undo log full: transaction touches more than {} bytes",
            LOG_CAPACITY
        );

        let old = self.mmap.bytes(offset, len)?.to_vec();
        let header = UndoRecordHeader {
            offset: U64::new(offset),
            len: U32::new(len as u32),
            _pad: U32::new(0),
            checksum: U64::new(record_checksum(offset, len as u32, &old)),
        };

        let record_base = LOG_RECORDS_BASE + used;
        self.mmap
            .bytes_mut(record_base, UNDO_RECORD_HEADER_SIZE)?
            .copy_from_slice(header.as_bytes());
        self.mmap
            .bytes_mut(record_base + UNDO_RECORD_HEADER_SIZE as u64, len)?
            .copy_from_slice(&old);

        if self.sync == SyncMode::Full {
            self.mmap.flush_range(record_base, record_len as usize)?;
        }

        // The record becomes visible to replay only once `used` covers it.
        self.write_word(LOG_USED_OFFSET, used + record_len)?;
        if self.sync == SyncMode::Full {
            self.mmap.flush_range(LOG_USED_OFFSET, 8)?;
        }
        Ok(())
    }

    /// Rolls back every visible undo record, newest first, then idles the
    /// log. Used both for an in-process abort and for crash recovery.
    pub(super) fn rollback_log(&mut self) -> Result<()> {
        let used = self.read_u64(LOG_USED_OFFSET)?;
        let mut entries: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut pos = 0u64;

        while pos + (UNDO_RECORD_HEADER_SIZE as u64) <= used {
            let record_base = LOG_RECORDS_BASE + pos;
            let header_bytes = self.mmap.bytes(record_base, UNDO_RECORD_HEADER_SIZE)?;
            let header = UndoRecordHeader::ref_from_bytes(header_bytes)
                .map_err(|e| eyre::eyre!("failed to parse undo record: {:?}", e))?;

            let offset = header.offset.get();
            let len = header.len.get() as usize;
            let checksum = header.checksum.get();

            if pos + UNDO_RECORD_HEADER_SIZE as u64 + align8(len as u64) > used {
                warn!(pos, "undo record extends past log tail, ending replay");
                break;
            }

            let old = self
                .mmap
                .bytes(record_base + UNDO_RECORD_HEADER_SIZE as u64, len)?
                .to_vec();

            if record_checksum(offset, len as u32, &old) != checksum {
                warn!(pos, offset, "undo record failed checksum, ending replay");
                break;
            }

            entries.push((offset, old));
            pos += UNDO_RECORD_HEADER_SIZE as u64 + align8(len as u64);
        }

        debug!(records = entries.len(), "rolling back transaction");
        for (offset, old) in entries.iter().rev() {
            self.mmap
                .bytes_mut(*offset, old.len())?
                .copy_from_slice(old);
        }

        self.log_reset()?;
        self.mmap.flush()?;
        Ok(())
    }

    /// Called at open: an active log is crash evidence, roll it back.
    pub(super) fn recover_log(&mut self) -> Result<()> {
        match self.read_u64(LOG_STATE_OFFSET)? {
            STATE_IDLE => Ok(()),
            STATE_ACTIVE => {
                debug!("pool opened with an active undo log, rolling back");
                self.rollback_log()
            }
            other => bail!("corrupt undo log state {}", other),
        }
    }
}

/// Handle to an in-flight durable transaction. Obtained via [`Pool::txn`].
pub struct PoolTxn<'p> {
    pool: &'p mut Pool,
    logged: SmallVec<[(u64, usize); 16]>,
}

impl<'p> PoolTxn<'p> {
    pub(super) fn new(pool: &'p mut Pool) -> Self {
        Self {
            pool,
            logged: SmallVec::new(),
        }
    }

    /// Read-only view of the pool for slot and leaf accessors.
    pub fn pool(&self) -> &Pool {
        self.pool
    }

    pub fn root(&self) -> Result<PAddr> {
        self.pool.root()
    }

    /// Atomically publishes a new root pointer at commit.
    pub fn set_root(&mut self, addr: PAddr) -> Result<()> {
        self.update_header(|header| header.set_root(addr))
    }

    /// Captures the current bytes of a range before its first mutation in
    /// this transaction. Exact duplicate ranges are skipped; overlapping
    /// ranges are logged again, which replay handles correctly.
    pub fn snapshot(&mut self, offset: u64, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        if self.logged.iter().any(|&(o, l)| o == offset && l == len) {
            return Ok(());
        }
        self.pool.log_append(offset, len)?;
        self.logged.push((offset, len));
        Ok(())
    }

    /// Undo-logged write of arbitrary bytes.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.snapshot(offset, bytes.len())?;
        self.pool
            .mmap
            .bytes_mut(offset, bytes.len())?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Undo-logged write of one native-endian word.
    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.write(offset, &value.to_ne_bytes())
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        self.pool.read_u64(offset)
    }

    /// Write without an undo record. Only sound for bytes that are
    /// unreachable if this transaction rolls back: blocks allocated in
    /// this transaction, whose reachability is itself undone.
    pub(crate) fn write_fresh(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.pool
            .mmap
            .bytes_mut(offset, bytes.len())?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Zero without an undo record; same soundness rule as `write_fresh`.
    pub(crate) fn zero_fresh(&mut self, offset: u64, len: usize) -> Result<()> {
        self.pool.mmap.bytes_mut(offset, len)?.fill(0);
        Ok(())
    }

    pub(super) fn update_header(&mut self, f: impl FnOnce(&mut PoolHeader)) -> Result<()> {
        self.snapshot(0, POOL_HEADER_SIZE)?;
        f(self.pool.header_mut()?);
        Ok(())
    }
}
