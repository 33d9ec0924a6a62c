use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use super::{
    BatchOp, EngineCursor, EngineError, EngineResult, StorageEngine, WriteBatch, PROP_APPROX_BYTES,
    PROP_NUM_ENTRIES, PROP_STATS,
};

static EMPTY: Bytes = Bytes::new();

#[derive(Default)]
struct MemState {
    map: BTreeMap<Vec<u8>, Bytes>,
    live_bytes: usize,
}

impl MemState {
    fn apply(&mut self, op: BatchOp) {
        match op {
            BatchOp::Put { key, value } => {
                let added = key.len() + value.len();
                if let Some(old) = self.map.insert(key.clone(), Bytes::from(value)) {
                    self.live_bytes -= key.len() + old.len();
                }
                self.live_bytes += added;
            }
            BatchOp::Delete { key } => {
                if let Some(old) = self.map.remove(&key) {
                    self.live_bytes -= key.len() + old.len();
                }
            }
        }
    }
}

/// Ordered in-memory engine.
///
/// A batch is applied under a single write-lock acquisition, so readers see
/// either none or all of it. Cursors re-seek from their last key on every
/// step and hold no lock in between.
#[derive(Default)]
pub struct MemEngine {
    state: RwLock<MemState>,
    fail_writes: AtomicBool,
    batches: AtomicU64,
    ops: AtomicU64,
}

impl MemEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`EngineError::Unavailable`]
    /// until switched off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state.read().map.len()
    }

    /// Whether the engine holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.read().map.is_empty()
    }

    pub(super) fn check_writable(&self) -> EngineResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("write failure injected"));
        }
        Ok(())
    }

    pub(super) fn apply_batch(&self, batch: WriteBatch) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.ops.fetch_add(batch.len() as u64, Ordering::Relaxed);
        let mut state = self.state.write();
        for op in batch.ops {
            state.apply(op);
        }
    }

    /// Clones every live entry in key order.
    pub(super) fn snapshot(&self) -> Vec<(Vec<u8>, Bytes)> {
        let state = self.state.read();
        state
            .map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn first_in(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        back: bool,
    ) -> Option<(Vec<u8>, Bytes)> {
        let state = self.state.read();
        let mut range = state.map.range::<[u8], _>((lower, upper));
        let hit = if back { range.next_back() } else { range.next() };
        hit.map(|(k, v)| (k.clone(), v.clone()))
    }
}

impl StorageEngine for MemEngine {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Bytes>> {
        Ok(self.state.read().map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    fn delete(&self, key: &[u8]) -> EngineResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    fn write(&self, batch: WriteBatch) -> EngineResult<()> {
        self.check_writable()?;
        self.apply_batch(batch);
        Ok(())
    }

    fn cursor(&self) -> Box<dyn EngineCursor + '_> {
        Box::new(MemCursor::new(self))
    }

    fn property(&self, name: &str) -> Option<String> {
        let state = self.state.read();
        match name {
            PROP_NUM_ENTRIES => Some(state.map.len().to_string()),
            PROP_APPROX_BYTES => Some(state.live_bytes.to_string()),
            PROP_STATS => Some(format!(
                "entries: {}\nlive_bytes: {}\nbatches: {}\nops: {}",
                state.map.len(),
                state.live_bytes,
                self.batches.load(Ordering::Relaxed),
                self.ops.load(Ordering::Relaxed),
            )),
            _ => None,
        }
    }

    fn compact_range(&self, _start: Option<&[u8]>, _end: Option<&[u8]>) -> EngineResult<()> {
        Ok(())
    }
}

pub(super) struct MemCursor<'a> {
    engine: &'a MemEngine,
    current: Option<(Vec<u8>, Bytes)>,
}

impl<'a> MemCursor<'a> {
    pub(super) fn new(engine: &'a MemEngine) -> Self {
        Self {
            engine,
            current: None,
        }
    }
}

impl EngineCursor for MemCursor<'_> {
    fn seek(&mut self, target: &[u8]) {
        self.current = self
            .engine
            .first_in(Bound::Included(target), Bound::Unbounded, false);
    }

    fn seek_to_first(&mut self) {
        self.current = self.engine.first_in(Bound::Unbounded, Bound::Unbounded, false);
    }

    fn seek_to_last(&mut self) {
        self.current = self.engine.first_in(Bound::Unbounded, Bound::Unbounded, true);
    }

    fn next(&mut self) {
        let next = match &self.current {
            Some((key, _)) => {
                self.engine
                    .first_in(Bound::Excluded(key.as_slice()), Bound::Unbounded, false)
            }
            None => None,
        };
        self.current = next;
    }

    fn prev(&mut self) {
        let prev = match &self.current {
            Some((key, _)) => {
                self.engine
                    .first_in(Bound::Unbounded, Bound::Excluded(key.as_slice()), true)
            }
            None => None,
        };
        self.current = prev;
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &Bytes {
        self.current.as_ref().map(|(_, v)| v).unwrap_or(&EMPTY)
    }
}
