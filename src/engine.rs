//! # Engine Facade
//!
//! The [`Engine`] trait is the uniform key-value surface every nvkv engine
//! implements. Keys and values are opaque byte strings: either may be empty
//! and either may contain embedded NUL bytes (everything is length-counted,
//! nothing is NUL-terminated).
//!
//! ## Callback Delivery
//!
//! Lookups and scans deliver bytes through caller-supplied closures. The
//! slices handed to a closure borrow from the engine's pool mapping and are
//! valid only for that invocation; an engine never returns a borrowed
//! pointer into persistent memory across its own return.
//!
//! ## Error Model
//!
//! Three kinds cover the whole surface:
//!
//! - [`KvError::NotFound`]: the requested key does not exist.
//! - [`KvError::NotSupported`]: the operation is not offered by the engine
//!   (range scans on `tree3`) or the engine name is unknown.
//! - [`KvError::Failed`]: any substrate fault - transaction rollback,
//!   allocation failure, I/O. The engine remains usable after a `Failed`
//!   return: the transaction either committed or rolled back cleanly, and
//!   volatile state is restored on the rollback path.
//!
//! Nothing is logged by default; `tracing` events fire only when a
//! subscriber asks for them.

use eyre::Report;
use thiserror::Error;
use tracing::debug;

use crate::config::EngineConfig;
use crate::tree::Tree3;
use crate::vsmap::VsMap;

/// Result type for all engine operations.
pub type KvResult<T> = std::result::Result<T, KvError>;

/// Errors surfaced across the engine boundary.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found")]
    NotFound,

    #[error("operation not supported by engine `{0}`")]
    NotSupported(String),

    #[error("engine operation failed: {0:#}")]
    Failed(Report),
}

impl KvError {
    /// Converts a substrate fault into the boundary error kind.
    pub(crate) fn failed(report: Report) -> Self {
        KvError::Failed(report)
    }
}

/// Callback receiving one byte string (a key, or a value).
pub type BytesCallback<'a> = dyn FnMut(&[u8]) + 'a;

/// Callback receiving a key and its value.
pub type PairCallback<'a> = dyn FnMut(&[u8], &[u8]) + 'a;

/// The uniform engine contract.
///
/// Engines are single-threaded: mutating operations take `&mut self` and
/// callers serialize access. The ordered operations (`*_above`, `*_below`,
/// `*_between` and their counts) default to [`KvError::NotSupported`];
/// ordered engines override them and yield keys in ascending lexicographic
/// order with strict bounds on both sides.
pub trait Engine {
    fn name(&self) -> &'static str;

    /// Inserts or overwrites one key. Overwriting never changes the count.
    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Delivers the value for `key` to `f`, exactly once, or `NotFound`
    /// without invoking `f`.
    fn get(&self, key: &[u8], f: &mut BytesCallback) -> KvResult<()>;

    fn exists(&self, key: &[u8]) -> KvResult<bool>;

    /// Removes one key, or `NotFound` if it is absent.
    fn remove(&mut self, key: &[u8]) -> KvResult<()>;

    /// Number of live entries.
    fn count(&self) -> KvResult<usize>;

    /// Invokes `f` once per live key. Order is engine-defined; `tree3`
    /// yields keys in arbitrary order.
    fn all(&self, f: &mut BytesCallback) -> KvResult<()>;

    /// Invokes `f` once per live entry with key and value.
    fn each(&self, f: &mut PairCallback) -> KvResult<()>;

    fn all_above(&self, _key: &[u8], _f: &mut BytesCallback) -> KvResult<()> {
        Err(KvError::NotSupported(self.name().to_string()))
    }

    fn all_below(&self, _key: &[u8], _f: &mut BytesCallback) -> KvResult<()> {
        Err(KvError::NotSupported(self.name().to_string()))
    }

    fn all_between(&self, _k1: &[u8], _k2: &[u8], _f: &mut BytesCallback) -> KvResult<()> {
        Err(KvError::NotSupported(self.name().to_string()))
    }

    fn each_above(&self, _key: &[u8], _f: &mut PairCallback) -> KvResult<()> {
        Err(KvError::NotSupported(self.name().to_string()))
    }

    fn each_below(&self, _key: &[u8], _f: &mut PairCallback) -> KvResult<()> {
        Err(KvError::NotSupported(self.name().to_string()))
    }

    fn each_between(&self, _k1: &[u8], _k2: &[u8], _f: &mut PairCallback) -> KvResult<()> {
        Err(KvError::NotSupported(self.name().to_string()))
    }

    fn count_above(&self, _key: &[u8]) -> KvResult<usize> {
        Err(KvError::NotSupported(self.name().to_string()))
    }

    fn count_below(&self, _key: &[u8]) -> KvResult<usize> {
        Err(KvError::NotSupported(self.name().to_string()))
    }

    fn count_between(&self, _k1: &[u8], _k2: &[u8]) -> KvResult<usize> {
        Err(KvError::NotSupported(self.name().to_string()))
    }
}

/// Opens the engine named by `config.engine` over its pool file.
pub fn open(config: &EngineConfig) -> KvResult<Box<dyn Engine>> {
    debug!(engine = %config.engine, path = %config.path.display(), "opening engine");
    match config.engine.as_str() {
        "tree3" => Ok(Box::new(Tree3::open(config).map_err(KvError::failed)?)),
        "vsmap" => Ok(Box::new(VsMap::open(config).map_err(KvError::failed)?)),
        other => Err(KvError::NotSupported(other.to_string())),
    }
}
