//! Narrow contract consumed from the ordered storage engine.
//!
//! The keyspace layers only need point reads, single writes, atomic batches
//! and a bidirectional cursor. Anything that satisfies [`StorageEngine`] can
//! back a [`crate::Db`]; two engines ship with the crate:
//!
//! * [`MemEngine`] keeps everything in an ordered in-memory map.
//! * [`LogEngine`] adds an append-only batch log so the map survives restarts.

use bytes::Bytes;
use thiserror::Error;

mod durable;
mod memory;

pub use durable::LogEngine;
pub use memory::MemEngine;

/// Errors reported by a storage engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// I/O error from the backing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Persistent state failed validation.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// The engine refused the request (closed, read-only, injected failure).
    #[error("engine unavailable: {0}")]
    Unavailable(&'static str),
}

/// Result alias for engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// When the durable engine forces its log to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// fsync after every batch.
    Full,
    /// Flush to the OS after every batch; fsync left to the OS.
    #[default]
    Normal,
    /// Buffer in process; flush only on compaction and drop.
    Off,
}

/// One staged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite.
    Put {
        /// Encoded storage key.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove if present.
    Delete {
        /// Encoded storage key.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Key the op touches.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Ordered list of mutations applied all-or-nothing by [`StorageEngine::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Stages a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Staged ops in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Number of staged ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Bidirectional cursor over the engine's keys in byte order.
///
/// Positioning calls leave the cursor either on an entry (`valid()`) or past
/// either end. `key`/`value` must only be called while valid.
pub trait EngineCursor {
    /// Positions at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);
    /// Positions at the smallest key.
    fn seek_to_first(&mut self);
    /// Positions at the largest key.
    fn seek_to_last(&mut self);
    /// Moves to the next larger key.
    fn next(&mut self);
    /// Moves to the next smaller key.
    fn prev(&mut self);
    /// Whether the cursor is on an entry.
    fn valid(&self) -> bool;
    /// Current key.
    fn key(&self) -> &[u8];
    /// Current value.
    fn value(&self) -> &Bytes;
}

/// Ordered byte-string store with atomic batches.
pub trait StorageEngine: Send + Sync {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> EngineResult<Option<Bytes>>;
    /// Single-key write.
    fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()>;
    /// Single-key delete.
    fn delete(&self, key: &[u8]) -> EngineResult<()>;
    /// Applies every op of `batch` or none of them.
    fn write(&self, batch: WriteBatch) -> EngineResult<()>;
    /// Opens a cursor; it is not positioned until a seek call.
    fn cursor(&self) -> Box<dyn EngineCursor + '_>;
    /// Diagnostic property by name, `None` if unknown.
    fn property(&self, name: &str) -> Option<String>;
    /// Reorganises storage for the given key range (`None` = unbounded).
    fn compact_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> EngineResult<()>;
}

/// Property with a multi-line summary.
pub const PROP_STATS: &str = "engine.stats";
/// Property with the live entry count.
pub const PROP_NUM_ENTRIES: &str = "engine.num-entries";
/// Property with the approximate live key+value bytes.
pub const PROP_APPROX_BYTES: &str = "engine.approximate-bytes";
