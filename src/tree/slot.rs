//! # Persistent Slot Records
//!
//! A slot is one durably allocated buffer holding a (hash, key, value)
//! triple:
//!
//! ```text
//! Offset          Size        Content
//! ------          ----        -------------------------------
//! 0               4           key_size: u32 (native endian)
//! 4               4           value_size: u32 (native endian)
//! 8               1           hash: u8 (never 0 when written)
//! 9               key_size    key bytes
//! 9 + ks          1           separator byte (0)
//! 10 + ks         value_size  value bytes
//! 10 + ks + vs    1           trailing byte (0)
//! ```
//!
//! The separator and trailing byte keep key and value addressable with a
//! single indirection each; they carry no meaning. The whole buffer is
//! freed and reallocated on every overwrite, whether or not the new value
//! would fit in place.

use eyre::{ensure, Result};
use zerocopy::native_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::pool::{PAddr, Pool, PoolTxn};

pub const SLOT_HEADER_SIZE: usize = 9;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SlotHeader {
    key_size: U32,
    value_size: U32,
    hash: u8,
}

const _: () = assert!(std::mem::size_of::<SlotHeader>() == SLOT_HEADER_SIZE);

impl SlotHeader {
    pub fn key_size(&self) -> usize {
        self.key_size.get() as usize
    }

    pub fn value_size(&self) -> usize {
        self.value_size.get() as usize
    }

    pub fn hash(&self) -> u8 {
        self.hash
    }
}

/// Allocated size of a slot holding `key_len` key bytes and `value_len`
/// value bytes.
pub fn total_size(key_len: usize, value_len: usize) -> usize {
    SLOT_HEADER_SIZE + key_len + 1 + value_len + 1
}

pub fn header(pool: &Pool, addr: PAddr) -> Result<&SlotHeader> {
    let bytes = pool.bytes(addr, SLOT_HEADER_SIZE)?;
    SlotHeader::ref_from_bytes(bytes).map_err(|e| eyre::eyre!("failed to parse slot header: {:?}", e))
}

pub fn hash(pool: &Pool, addr: PAddr) -> Result<u8> {
    Ok(header(pool, addr)?.hash())
}

pub fn key(pool: &Pool, addr: PAddr) -> Result<&[u8]> {
    let ks = header(pool, addr)?.key_size();
    pool.bytes(PAddr::new(addr.get() + SLOT_HEADER_SIZE as u64), ks)
}

pub fn value(pool: &Pool, addr: PAddr) -> Result<&[u8]> {
    let header = header(pool, addr)?;
    let offset = addr.get() + SLOT_HEADER_SIZE as u64 + header.key_size() as u64 + 1;
    pool.bytes(PAddr::new(offset), header.value_size())
}

/// Allocates and fills a new slot buffer inside the current transaction.
/// The block comes back zeroed, so the separator and trailing byte need no
/// explicit write.
pub fn write(tx: &mut PoolTxn<'_>, hash: u8, key: &[u8], value: &[u8]) -> Result<PAddr> {
    ensure!(hash != 0, "slot hash 0 is reserved for empty slots");
    ensure!(key.len() <= u32::MAX as usize, "key too large for slot header");
    ensure!(value.len() <= u32::MAX as usize, "value too large for slot header");

    let addr = tx.alloc(total_size(key.len(), value.len()))?;

    let header = SlotHeader {
        key_size: U32::new(key.len() as u32),
        value_size: U32::new(value.len() as u32),
        hash,
    };
    // The block was allocated in this transaction; a rollback makes it
    // unreachable, so the fills need no undo records of their own.
    tx.write_fresh(addr.get(), header.as_bytes())?;
    tx.write_fresh(addr.get() + SLOT_HEADER_SIZE as u64, key)?;
    tx.write_fresh(
        addr.get() + SLOT_HEADER_SIZE as u64 + key.len() as u64 + 1,
        value,
    )?;
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_POOL_SIZE;
    use crate::pool::SyncMode;
    use tempfile::tempdir;

    fn test_pool(dir: &tempfile::TempDir) -> Pool {
        Pool::create(
            &dir.path().join("slot.pool"),
            "test",
            MIN_POOL_SIZE,
            SyncMode::Off,
        )
        .unwrap()
    }

    #[test]
    fn slot_roundtrip() {
        let dir = tempdir().unwrap();
        let mut pool = test_pool(&dir);

        let addr = pool
            .txn(|tx| write(tx, 0x2A, b"key1", b"value1"))
            .unwrap();

        assert_eq!(hash(&pool, addr).unwrap(), 0x2A);
        assert_eq!(key(&pool, addr).unwrap(), b"key1");
        assert_eq!(value(&pool, addr).unwrap(), b"value1");
    }

    #[test]
    fn empty_key_and_value_are_legal() {
        let dir = tempdir().unwrap();
        let mut pool = test_pool(&dir);

        let addr = pool.txn(|tx| write(tx, 1, b"", b"")).unwrap();

        assert_eq!(key(&pool, addr).unwrap(), b"");
        assert_eq!(value(&pool, addr).unwrap(), b"");
        assert_eq!(header(&pool, addr).unwrap().key_size(), 0);
    }

    #[test]
    fn embedded_nul_bytes_roundtrip() {
        let dir = tempdir().unwrap();
        let mut pool = test_pool(&dir);

        let addr = pool
            .txn(|tx| write(tx, 7, b"a\0b", b"v\0\0w"))
            .unwrap();

        assert_eq!(key(&pool, addr).unwrap(), b"a\0b");
        assert_eq!(value(&pool, addr).unwrap(), b"v\0\0w");
    }

    #[test]
    fn zero_hash_is_rejected() {
        let dir = tempdir().unwrap();
        let mut pool = test_pool(&dir);

        assert!(pool.txn(|tx| write(tx, 0, b"k", b"v")).is_err());
    }

    #[test]
    fn total_size_matches_layout() {
        assert_eq!(total_size(0, 0), 11);
        assert_eq!(total_size(4, 6), 21);
    }
}
