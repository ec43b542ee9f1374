//! # The vsmap Engine
//!
//! An ordered key-value map with range scans. Key and value bytes live in
//! pool-allocated slot records; ordering lives in a volatile `BTreeMap`
//! from key to durable record address.
//!
//! Like its volatile-from-pmem ancestors, the map's *contents* are tied to
//! the engine instance: opening a vsmap reinitializes its pool file, and
//! only the bytes - not the map - survive a restart. The durability story
//! belongs to `tree3`; vsmap trades it for ordered iteration.
//!
//! ## Range Semantics
//!
//! All range operations use strict bounds on both sides:
//!
//! - `*_above(k)`: keys strictly greater than `k`, ascending
//! - `*_below(k)`: keys strictly less than `k`, ascending
//! - `*_between(k1, k2)`: `k1 < key < k2`, ascending; if `k1 >= k2` the
//!   range is empty

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use eyre::Result;
use tracing::trace;

use crate::config::EngineConfig;
use crate::engine::{BytesCallback, Engine, KvError, KvResult, PairCallback};
use crate::pool::{PAddr, Pool};
use crate::tree::hash::pearson_hash;
use crate::tree::slot;

/// Pool layout tag; governs file compatibility.
pub const LAYOUT_TAG: &str = "vsmap";

pub struct VsMap {
    pool: Pool,
    index: BTreeMap<Box<[u8]>, PAddr>,
}

impl VsMap {
    /// Creates the engine over a freshly initialized pool at the
    /// configured path.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let pool = Pool::create(&config.path, LAYOUT_TAG, config.size, config.sync)?;
        Ok(Self {
            pool,
            index: BTreeMap::new(),
        })
    }

    fn put_impl(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let hash = pearson_hash(key);
        let VsMap { pool, index } = self;
        let old = index.get(key).copied();
        let addr = pool.txn(|tx| {
            if let Some(old) = old {
                tx.free(old)?;
            }
            slot::write(tx, hash, key, value)
        })?;
        index.insert(Box::from(key), addr);
        Ok(())
    }

    fn remove_impl(&mut self, key: &[u8]) -> Result<bool> {
        let VsMap { pool, index } = self;
        let Some(&addr) = index.get(key) else {
            return Ok(false);
        };
        pool.txn(|tx| tx.free(addr))?;
        index.remove(key);
        Ok(true)
    }

    fn emit_key(&self, addr: PAddr, f: &mut BytesCallback) -> Result<()> {
        f(slot::key(&self.pool, addr)?);
        Ok(())
    }

    fn emit_value(&self, addr: PAddr, f: &mut BytesCallback) -> Result<()> {
        f(slot::value(&self.pool, addr)?);
        Ok(())
    }

    fn emit_pair(&self, addr: PAddr, f: &mut PairCallback) -> Result<()> {
        f(slot::key(&self.pool, addr)?, slot::value(&self.pool, addr)?);
        Ok(())
    }
}

impl Engine for VsMap {
    fn name(&self) -> &'static str {
        "vsmap"
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        trace!(key_len = key.len(), value_len = value.len(), "put");
        self.put_impl(key, value).map_err(KvError::failed)
    }

    fn get(&self, key: &[u8], f: &mut BytesCallback) -> KvResult<()> {
        let Some(&addr) = self.index.get(key) else {
            return Err(KvError::NotFound);
        };
        self.emit_value(addr, f).map_err(KvError::failed)
    }

    fn exists(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.index.contains_key(key))
    }

    fn remove(&mut self, key: &[u8]) -> KvResult<()> {
        if self.remove_impl(key).map_err(KvError::failed)? {
            Ok(())
        } else {
            Err(KvError::NotFound)
        }
    }

    fn count(&self) -> KvResult<usize> {
        Ok(self.index.len())
    }

    fn all(&self, f: &mut BytesCallback) -> KvResult<()> {
        for &addr in self.index.values() {
            self.emit_key(addr, f).map_err(KvError::failed)?;
        }
        Ok(())
    }

    fn each(&self, f: &mut PairCallback) -> KvResult<()> {
        for &addr in self.index.values() {
            self.emit_pair(addr, f).map_err(KvError::failed)?;
        }
        Ok(())
    }

    fn all_above(&self, key: &[u8], f: &mut BytesCallback) -> KvResult<()> {
        for (_, &addr) in self.index.range::<[u8], _>((Excluded(key), Unbounded)) {
            self.emit_key(addr, f).map_err(KvError::failed)?;
        }
        Ok(())
    }

    fn all_below(&self, key: &[u8], f: &mut BytesCallback) -> KvResult<()> {
        for (_, &addr) in self.index.range::<[u8], _>((Unbounded, Excluded(key))) {
            self.emit_key(addr, f).map_err(KvError::failed)?;
        }
        Ok(())
    }

    fn all_between(&self, k1: &[u8], k2: &[u8], f: &mut BytesCallback) -> KvResult<()> {
        if k1 < k2 {
            for (_, &addr) in self.index.range::<[u8], _>((Excluded(k1), Excluded(k2))) {
                self.emit_key(addr, f).map_err(KvError::failed)?;
            }
        }
        Ok(())
    }

    fn each_above(&self, key: &[u8], f: &mut PairCallback) -> KvResult<()> {
        for (_, &addr) in self.index.range::<[u8], _>((Excluded(key), Unbounded)) {
            self.emit_pair(addr, f).map_err(KvError::failed)?;
        }
        Ok(())
    }

    fn each_below(&self, key: &[u8], f: &mut PairCallback) -> KvResult<()> {
        for (_, &addr) in self.index.range::<[u8], _>((Unbounded, Excluded(key))) {
            self.emit_pair(addr, f).map_err(KvError::failed)?;
        }
        Ok(())
    }

    fn each_between(&self, k1: &[u8], k2: &[u8], f: &mut PairCallback) -> KvResult<()> {
        if k1 < k2 {
            for (_, &addr) in self.index.range::<[u8], _>((Excluded(k1), Excluded(k2))) {
                self.emit_pair(addr, f).map_err(KvError::failed)?;
            }
        }
        Ok(())
    }

    fn count_above(&self, key: &[u8]) -> KvResult<usize> {
        Ok(self.index.range::<[u8], _>((Excluded(key), Unbounded)).count())
    }

    fn count_below(&self, key: &[u8]) -> KvResult<usize> {
        Ok(self.index.range::<[u8], _>((Unbounded, Excluded(key))).count())
    }

    fn count_between(&self, k1: &[u8], k2: &[u8]) -> KvResult<usize> {
        if k1 < k2 {
            Ok(self
                .index
                .range::<[u8], _>((Excluded(k1), Excluded(k2)))
                .count())
        } else {
            Ok(0)
        }
    }
}
