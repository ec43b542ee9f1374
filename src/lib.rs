//! # nvkv - Persistent Key-Value Engine
//!
//! nvkv is an embedded key-value storage engine for byte-addressable
//! persistent memory, emulated over a memory-mapped pool file. It exposes a
//! small uniform interface (put/get/remove/exists/count/scan-by-callback)
//! backed by swappable engines:
//!
//! - **tree3**: a crash-consistent hybrid B+ tree. Inner routing nodes live
//!   in volatile memory; leaves live in the persistent pool and are strung
//!   into an unordered linked list from which the routing structure is
//!   rebuilt on every open.
//! - **vsmap**: an ordered map whose key and value bytes live in the pool
//!   heap, with range-scan support. Its contents are tied to the engine
//!   instance, like its volatile-from-pmem ancestors.
//!
//! ## Quick Start
//!
//! ```ignore
//! use nvkv::{open, EngineConfig};
//!
//! let config = EngineConfig::new("tree3", "/mnt/pmem/kv.pool");
//! let mut kv = open(&config)?;
//!
//! kv.put(b"key1", b"value1")?;
//! kv.get(b"key1", &mut |value| assert_eq!(value, b"value1"))?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------+
//! |     Engine facade (open/dispatch)    |
//! +-------------------+------------------+
//! |   tree3 engine    |   vsmap engine   |
//! |  volatile routing |  ordered index   |
//! |  persistent leaves|  pool records    |
//! +-------------------+------------------+
//! |  Pool: durable allocator + undo-log  |
//! |  transactions over one mmap'd file   |
//! +--------------------------------------+
//! ```
//!
//! ## Crash Consistency
//!
//! Every persistent mutation runs inside a scoped durable transaction
//! ([`pool::Pool::txn`]): old bytes are captured in an undo log before the
//! first write of a range, and an interrupted transaction is rolled back the
//! next time the pool is opened. Volatile structures are only updated after
//! the commit point, so a rollback never leaves the in-memory tree ahead of
//! the persistent state.
//!
//! ## Concurrency Contract
//!
//! An engine instance is single-threaded: mutating operations take
//! `&mut self` and there is no internal locking. Callers serialize access.
//!
//! ## Module Overview
//!
//! - [`pool`]: memory-mapped pool, durable allocator, undo-log transactions
//! - [`tree`]: the tree3 hybrid B+ tree engine
//! - [`vsmap`]: the ordered vsmap engine
//! - [`engine`]: the `Engine` trait, error kinds, and name-based dispatch
//! - [`config`]: open-time configuration and capacity constants

pub mod config;
pub mod engine;
pub mod pool;
pub mod tree;
pub mod vsmap;

pub use config::EngineConfig;
pub use engine::{open, Engine, KvError, KvResult};
pub use pool::SyncMode;
pub use tree::Tree3;
pub use vsmap::VsMap;
