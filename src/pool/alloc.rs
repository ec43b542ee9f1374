//! # Durable Heap Allocator
//!
//! Block allocation inside the pool heap. Every block carries an 8-byte
//! capacity word immediately before its body; a [`PAddr`] always points at
//! the body.
//!
//! ```text
//! block_base        block_base + 8 (= PAddr)
//! +----------------+------------------------------+
//! | capacity: u64  | body (capacity bytes)        |
//! +----------------+------------------------------+
//! ```
//!
//! ## Strategy
//!
//! Freed blocks form an intrusive singly-linked list threaded through the
//! first 8 bytes of each free body, headed by the pool header's
//! `free_head`. Allocation is first-fit over that list, falling back to
//! bumping `heap_top`. Blocks are never split or coalesced: the engines
//! allocate a small number of size classes (slot records and leaves) and
//! churn re-uses the same classes. Exhaustion of the heap is an error the
//! engine boundary reports as a failed operation.
//!
//! ## Transactionality
//!
//! All allocator operations run inside a [`super::PoolTxn`] and undo-log
//! what they touch. A block handed out from the free list has its whole
//! body snapshotted before it is zeroed, so a rollback restores both the
//! free-list link and whatever record the block held before it was freed
//! earlier in the same transaction.

use eyre::{ensure, Result};

use crate::config::HEAP_BASE;

use super::header::PAddr;
use super::txn::PoolTxn;

pub const BLOCK_HEADER_SIZE: u64 = 8;

fn align8(len: u64) -> u64 {
    (len + 7) & !7
}

impl PoolTxn<'_> {
    /// Allocates a zeroed block of at least `len` bytes, durable at commit.
    pub fn alloc(&mut self, len: usize) -> Result<PAddr> {
        ensure!(len > 0, "zero-length allocation");
        let needed = align8(len as u64);

        // First fit over the free list.
        let mut prev: Option<PAddr> = None;
        let mut cur = self.pool().header()?.free_head();
        while !cur.is_null() {
            ensure!(
                cur.get() >= HEAP_BASE + BLOCK_HEADER_SIZE,
                "corrupt free list: block at {} below heap base",
                cur.get()
            );
            let cap = self.read_u64(cur.get() - BLOCK_HEADER_SIZE)?;
            let next = self.read_u64(cur.get())?;
            if cap >= needed {
                self.snapshot(cur.get(), cap as usize)?;
                match prev {
                    None => self.update_header(|h| h.set_free_head(PAddr::new(next)))?,
                    Some(p) => self.write_u64(p.get(), next)?,
                }
                self.zero_fresh(cur.get(), cap as usize)?;
                return Ok(cur);
            }
            prev = Some(cur);
            cur = PAddr::new(next);
        }

        // Bump allocation from the heap cursor.
        let header = self.pool().header()?;
        let block_base = header.heap_top();
        let body = block_base + BLOCK_HEADER_SIZE;
        let end = body + needed;
        ensure!(
            end <= header.pool_size(),
            "pool exhausted: {} bytes requested, {} available",
            needed,
            header.pool_size().saturating_sub(body)
        );

        self.update_header(|h| h.set_heap_top(end))?;
        // Fresh territory beyond the old heap_top: a rollback restores the
        // cursor and the bytes become unreachable again.
        self.write_fresh(block_base, &needed.to_ne_bytes())?;
        self.zero_fresh(body, needed as usize)?;
        Ok(PAddr::new(body))
    }

    /// Returns a block to the free list. The block's contents stay intact
    /// in the undo log until commit, so a rollback resurrects the record.
    pub fn free(&mut self, addr: PAddr) -> Result<()> {
        ensure!(!addr.is_null(), "freeing null pointer");
        ensure!(
            addr.get() >= HEAP_BASE + BLOCK_HEADER_SIZE,
            "freeing address {} below heap base",
            addr.get()
        );
        let cap = self.read_u64(addr.get() - BLOCK_HEADER_SIZE)?;
        ensure!(
            cap >= 8 && addr.get() + cap <= self.pool().header()?.pool_size(),
            "corrupt block header at {}: capacity {}",
            addr.get(),
            cap
        );

        let head = self.pool().header()?.free_head();
        self.write_u64(addr.get(), head.get())?;
        self.update_header(|h| h.set_free_head(addr))?;
        Ok(())
    }
}
