//! # nvkv Configuration Constants
//!
//! This module centralizes the capacity and layout constants shared by the
//! engines and the pool substrate. Constants that depend on each other are
//! co-located so a change to one is checked against the others.
//!
//! ## Dependency Graph
//!
//! ```text
//! LEAF_CAPACITY (48)
//!       |
//!       +-> LEAF_MIDPOINT (LEAF_CAPACITY / 2)
//!             Index into the sorted LEAF_CAPACITY + 1 candidate keys that
//!             becomes the split key when a full leaf splits.
//!
//! INNER_CAPACITY (4)
//!       |
//!       +-> INNER_MIDPOINT (INNER_CAPACITY / 2)
//!       |     Keys an overflowing inner node retains after splitting.
//!       |
//!       +-> INNER_UPPER (INNER_CAPACITY / 2 + 1)
//!             First key index that moves to the new sibling. The key at
//!             INNER_MIDPOINT is promoted, not copied, so both halves end
//!             up with exactly INNER_MIDPOINT keys.
//!
//! POOL_HEADER_SIZE (128) + UNDO_LOG_SIZE (1 MiB)
//!       |
//!       +-> HEAP_BASE (first allocatable byte of the pool)
//!       +-> MIN_POOL_SIZE (smallest pool that can hold any data at all)
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions below:
//!
//! 1. `INNER_CAPACITY` is even, so a split leaves both halves with exactly
//!    `INNER_MIDPOINT` keys.
//! 2. An inner node's overflow slot makes room for one insertion past
//!    capacity, never more: splits run immediately on overflow.
//! 3. The undo log can hold the largest single-transaction footprint (a
//!    leaf split snapshots two full leaves plus the pool header).

/// Slot-pointer capacity of one persistent leaf.
pub const LEAF_CAPACITY: usize = 48;

/// Midpoint of the sorted candidate keys during a leaf split; the key at
/// this index becomes the split key.
pub const LEAF_MIDPOINT: usize = LEAF_CAPACITY / 2;

/// Maximum separator keys per volatile inner node.
pub const INNER_CAPACITY: usize = 4;

/// Keys retained by each half of a split inner node.
pub const INNER_MIDPOINT: usize = INNER_CAPACITY / 2;

/// First key index moved to the new sibling during an inner split.
pub const INNER_UPPER: usize = INNER_CAPACITY / 2 + 1;

/// Bytes reserved at the front of the pool file for the header.
pub const POOL_HEADER_SIZE: usize = 128;

/// Bytes reserved for the undo log region, directly after the header.
pub const UNDO_LOG_SIZE: usize = 1024 * 1024;

/// First heap byte: everything from here to the end of the file is
/// allocatable.
pub const HEAP_BASE: u64 = POOL_HEADER_SIZE as u64 + UNDO_LOG_SIZE as u64;

/// Smallest pool size accepted at creation time. One header, one undo log,
/// and room for at least a leaf and a handful of slots.
pub const MIN_POOL_SIZE: u64 = HEAP_BASE + 64 * 1024;

/// Default pool size when the configuration does not specify one.
pub const DEFAULT_POOL_SIZE: u64 = 64 * 1024 * 1024;

const _: () = assert!(
    INNER_CAPACITY % 2 == 0,
    "INNER_CAPACITY must be even so both halves of a split hold INNER_MIDPOINT keys"
);

const _: () = assert!(
    INNER_MIDPOINT + 1 == INNER_UPPER,
    "the promoted key sits exactly between the retained and moved halves"
);

const _: () = assert!(
    LEAF_MIDPOINT * 2 == LEAF_CAPACITY,
    "LEAF_MIDPOINT must be the exact midpoint of the candidate key array"
);

const _: () = assert!(MIN_POOL_SIZE > HEAP_BASE);
