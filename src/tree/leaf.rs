//! # Leaves: Persistent Layout and Volatile Descriptors
//!
//! A persistent leaf is a fixed array of durable slot pointers plus a
//! forward link. Leaves form an unordered singly-linked list rooted in the
//! pool header; the list is a bag - its order carries no meaning.
//!
//! ```text
//! Offset   Size   Content
//! ------   ----   --------------------------------
//! 0        384    slots: [PAddr; LEAF_CAPACITY]
//! 384      8      next: PAddr of the next leaf (0 = end)
//! ```
//!
//! Every leaf has a volatile companion, [`LeafNode`], holding a copy of
//! each slot's hash and key bytes. The redundancy is deliberate: search
//! runs entirely over the descriptors, and persistent memory is read only
//! after a full key match, to fetch the value. The descriptor invariant is
//! `hashes[i] == 0` exactly when persistent slot `i` is null, and when
//! non-zero the hash and key mirror the persistent slot byte for byte.

use eyre::Result;
use zerocopy::native_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::LEAF_CAPACITY;
use crate::pool::{PAddr, Pool, PoolTxn};

/// Bytes occupied by the slot-pointer array.
pub const LEAF_SLOTS_BYTES: usize = LEAF_CAPACITY * 8;

/// Allocated size of one persistent leaf.
pub const LEAF_BYTES: usize = LEAF_SLOTS_BYTES + 8;

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct LeafLayout {
    slots: [U64; LEAF_CAPACITY],
    next: U64,
}

const _: () = assert!(std::mem::size_of::<LeafLayout>() == LEAF_BYTES);

impl LeafLayout {
    pub fn view(pool: &Pool, addr: PAddr) -> Result<&Self> {
        let bytes = pool.bytes(addr, LEAF_BYTES)?;
        Self::ref_from_bytes(bytes).map_err(|e| eyre::eyre!("failed to parse leaf: {:?}", e))
    }

    pub fn slot(&self, idx: usize) -> PAddr {
        PAddr::new(self.slots[idx].get())
    }

    pub fn next(&self) -> PAddr {
        PAddr::new(self.next.get())
    }
}

pub fn slot_addr(pool: &Pool, leaf: PAddr, idx: usize) -> Result<PAddr> {
    Ok(LeafLayout::view(pool, leaf)?.slot(idx))
}

pub fn next_leaf(pool: &Pool, leaf: PAddr) -> Result<PAddr> {
    Ok(LeafLayout::view(pool, leaf)?.next())
}

pub fn set_slot(tx: &mut PoolTxn<'_>, leaf: PAddr, idx: usize, slot: PAddr) -> Result<()> {
    tx.write_u64(leaf.get() + (idx * 8) as u64, slot.get())
}

pub fn set_next(tx: &mut PoolTxn<'_>, leaf: PAddr, next: PAddr) -> Result<()> {
    tx.write_u64(leaf.get() + LEAF_SLOTS_BYTES as u64, next.get())
}

/// Outcome of scanning a descriptor for an insertion slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotScan {
    /// The key already lives at this index; overwrite it.
    KeyMatch(usize),
    /// First empty slot; the key is new to this leaf.
    EmptySlot(usize),
    /// No match and no room: the leaf must split.
    Full,
}

/// Volatile descriptor mirroring one persistent leaf.
#[derive(Debug)]
pub struct LeafNode {
    /// Durable address of the mirrored leaf.
    pub leaf: PAddr,
    /// Per-slot hash copies; 0 marks an empty slot.
    pub hashes: [u8; LEAF_CAPACITY],
    /// Per-slot key copies.
    pub keys: [Vec<u8>; LEAF_CAPACITY],
}

impl LeafNode {
    pub fn new(leaf: PAddr) -> Self {
        Self {
            leaf,
            hashes: [0; LEAF_CAPACITY],
            keys: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// One pass over the slots: a key match wins over the first empty slot.
    pub fn scan(&self, hash: u8, key: &[u8]) -> SlotScan {
        let mut first_empty = None;
        for idx in 0..LEAF_CAPACITY {
            let slot_hash = self.hashes[idx];
            if slot_hash == 0 {
                if first_empty.is_none() {
                    first_empty = Some(idx);
                }
            } else if slot_hash == hash && self.keys[idx] == key {
                return SlotScan::KeyMatch(idx);
            }
        }
        match first_empty {
            Some(idx) => SlotScan::EmptySlot(idx),
            None => SlotScan::Full,
        }
    }

    /// Index of the slot holding `key`, if present.
    pub fn find(&self, hash: u8, key: &[u8]) -> Option<usize> {
        (0..LEAF_CAPACITY).find(|&idx| self.hashes[idx] == hash && self.keys[idx] == key)
    }
}
