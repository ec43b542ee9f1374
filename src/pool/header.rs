//! # Pool Header and Durable Pointers
//!
//! The first 128 bytes of every pool file are a fixed header: magic bytes,
//! a layout tag naming the engine format the pool holds, a format version,
//! and the three mutable words the substrate maintains transactionally
//! (root pointer, heap cursor, free-list head).
//!
//! ## Durable Pointers
//!
//! A [`PAddr`] is a byte offset from the start of the pool file. Offsets
//! are stable across close/reopen, which is the whole point: persistent
//! structures reference each other by `PAddr`, never by virtual address.
//! Offset 0 (inside the header) can never be allocated, so 0 doubles as
//! the null pointer.
//!
//! ## Endianness
//!
//! Header and heap integers are native-endian: the on-media format is
//! explicitly not portable across architectures, matching the byte-for-
//! byte layout contract of the slot records. The zerocopy native-endian
//! wrappers keep access safe on unaligned mmap bytes either way.

use eyre::{ensure, Result};
use zerocopy::native_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{HEAP_BASE, POOL_HEADER_SIZE};

pub const POOL_MAGIC: &[u8; 8] = b"nvkvpool";
pub const CURRENT_VERSION: u32 = 1;

/// Maximum bytes of a layout tag, NUL-padded in the header.
pub const LAYOUT_TAG_SIZE: usize = 8;

/// A durable pointer: a byte offset into the pool file. Zero is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PAddr(u64);

impl PAddr {
    pub const NULL: PAddr = PAddr(0);

    pub fn new(offset: u64) -> Self {
        PAddr(offset)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PoolHeader {
    magic: [u8; 8],
    layout: [u8; LAYOUT_TAG_SIZE],
    version: U32,
    _pad: [u8; 4],
    pool_size: U64,
    root: U64,
    heap_top: U64,
    free_head: U64,
    reserved: [u8; 72],
}

const _: () = assert!(std::mem::size_of::<PoolHeader>() == POOL_HEADER_SIZE);

impl PoolHeader {
    pub fn new(layout_tag: &str, pool_size: u64) -> Result<Self> {
        let tag = layout_tag.as_bytes();
        ensure!(
            !tag.is_empty() && tag.len() <= LAYOUT_TAG_SIZE,
            "layout tag '{}' must be 1..={} bytes",
            layout_tag,
            LAYOUT_TAG_SIZE
        );

        let mut layout = [0u8; LAYOUT_TAG_SIZE];
        layout[..tag.len()].copy_from_slice(tag);

        Ok(Self {
            magic: *POOL_MAGIC,
            layout,
            version: U32::new(CURRENT_VERSION),
            _pad: [0u8; 4],
            pool_size: U64::new(pool_size),
            root: U64::new(0),
            heap_top: U64::new(HEAP_BASE),
            free_head: U64::new(0),
            reserved: [0u8; 72],
        })
    }

    /// Parses and validates a header against the expected layout tag.
    pub fn from_bytes<'a>(bytes: &'a [u8], layout_tag: &str) -> Result<&'a Self> {
        ensure!(
            bytes.len() >= POOL_HEADER_SIZE,
            "buffer too small for PoolHeader: {} < {}",
            bytes.len(),
            POOL_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..POOL_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse PoolHeader: {:?}", e))?;

        ensure!(
            &header.magic == POOL_MAGIC,
            "not an nvkv pool file (bad magic)"
        );

        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported pool version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        let tag = header.layout_tag();
        ensure!(
            tag == layout_tag,
            "pool layout mismatch: file holds '{}', engine expects '{}'",
            tag,
            layout_tag
        );

        Ok(header)
    }

    pub fn from_bytes_mut<'a>(bytes: &'a mut [u8], layout_tag: &str) -> Result<&'a mut Self> {
        // Validate through the shared-ref path first.
        Self::from_bytes(bytes, layout_tag)?;
        let header = Self::mut_from_bytes(&mut bytes[..POOL_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse PoolHeader: {:?}", e))?;
        Ok(header)
    }

    pub fn layout_tag(&self) -> &str {
        let end = self
            .layout
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LAYOUT_TAG_SIZE);
        std::str::from_utf8(&self.layout[..end]).unwrap_or("")
    }

    pub fn pool_size(&self) -> u64 {
        self.pool_size.get()
    }

    pub fn root(&self) -> PAddr {
        PAddr::new(self.root.get())
    }

    pub fn set_root(&mut self, addr: PAddr) {
        self.root = U64::new(addr.get());
    }

    pub fn heap_top(&self) -> u64 {
        self.heap_top.get()
    }

    pub fn set_heap_top(&mut self, top: u64) {
        self.heap_top = U64::new(top);
    }

    pub fn free_head(&self) -> PAddr {
        PAddr::new(self.free_head.get())
    }

    pub fn set_free_head(&mut self, addr: PAddr) {
        self.free_head = U64::new(addr.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn header_size_is_128() {
        assert_eq!(std::mem::size_of::<PoolHeader>(), 128);
    }

    #[test]
    fn header_roundtrip() {
        let mut header = PoolHeader::new("tree3", 1 << 20).unwrap();
        header.set_root(PAddr::new(4096));
        header.set_heap_top(HEAP_BASE + 512);
        header.set_free_head(PAddr::new(8192));

        let bytes = header.as_bytes().to_vec();
        let parsed = PoolHeader::from_bytes(&bytes, "tree3").unwrap();

        assert_eq!(parsed.layout_tag(), "tree3");
        assert_eq!(parsed.pool_size(), 1 << 20);
        assert_eq!(parsed.root(), PAddr::new(4096));
        assert_eq!(parsed.heap_top(), HEAP_BASE + 512);
        assert_eq!(parsed.free_head(), PAddr::new(8192));
    }

    #[test]
    fn header_rejects_wrong_layout_tag() {
        let header = PoolHeader::new("tree3", 1 << 20).unwrap();
        let bytes = header.as_bytes().to_vec();

        let err = PoolHeader::from_bytes(&bytes, "vsmap").unwrap_err();
        assert!(err.to_string().contains("layout mismatch"));
    }

    #[test]
    fn header_rejects_bad_magic() {
        let header = PoolHeader::new("tree3", 1 << 20).unwrap();
        let mut bytes = header.as_bytes().to_vec();
        bytes[0] ^= 0xFF;

        assert!(PoolHeader::from_bytes(&bytes, "tree3").is_err());
    }

    #[test]
    fn header_rejects_truncated_buffer() {
        let header = PoolHeader::new("tree3", 1 << 20).unwrap();
        let bytes = header.as_bytes().to_vec();

        assert!(PoolHeader::from_bytes(&bytes[..64], "tree3").is_err());
    }

    #[test]
    fn null_paddr() {
        assert!(PAddr::NULL.is_null());
        assert!(!PAddr::new(1).is_null());
        assert_eq!(PAddr::default(), PAddr::NULL);
    }

    #[test]
    fn layout_tag_too_long_is_rejected() {
        assert!(PoolHeader::new("much-too-long-tag", 1 << 20).is_err());
        assert!(PoolHeader::new("", 1 << 20).is_err());
    }
}
