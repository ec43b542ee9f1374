//! # tree3: Hybrid Volatile/Persistent B+ Tree
//!
//! The engine stores every key twice: durably inside its slot record, and
//! again in a volatile leaf descriptor. Search touches only the volatile
//! side - hashes first, full keys on a hash hit - and reads persistent
//! memory exactly once per lookup, to deliver the value. The price is
//! rebuilding the descriptors and routing nodes from the persistent leaf
//! list on every open, which [`tree::Tree3`] recovery does in one pass.
//!
//! Module split:
//!
//! - `hash`: 8-bit Pearson digest used to prune in-leaf comparisons
//! - `slot`: persistent (hash, key, value) records
//! - `leaf`: persistent leaf layout and the volatile descriptor
//! - `inner`: volatile routing nodes
//! - `tree`: the engine itself - search, insert, split, remove, recovery

pub mod hash;
pub mod inner;
pub mod leaf;
pub mod slot;
mod tree;

pub use tree::{Tree3, LAYOUT_TAG};
