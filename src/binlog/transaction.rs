use bytes::Bytes;
use parking_lot::MutexGuard;
use tracing::{debug, warn};

use super::{Binlog, BinlogCommand, BinlogQueue, BinlogType, LogState};
use crate::engine::WriteBatch;
use crate::keyspace;
use crate::types::{KvError, Result};

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting staged writes and records.
    Open,
    /// The batch reached the engine.
    Committed,
    /// Dropped without commit, or the commit failed; nothing persisted.
    Aborted,
}

/// One atomic batch of engine writes plus the binlog records describing it.
///
/// Created by [`BinlogQueue::begin`]. Writes staged with [`put`](Self::put)
/// and [`delete`](Self::delete) are invisible until [`commit`](Self::commit)
/// applies them, together with every record added by
/// [`add_log`](Self::add_log), in a single engine write. Dropping an open
/// transaction discards the batch.
///
/// The transaction holds the queue lock for its whole life, so reads made
/// through [`get`](Self::get) cannot be invalidated by another writer before
/// commit.
pub struct Transaction<'q> {
    queue: &'q BinlogQueue,
    log: MutexGuard<'q, LogState>,
    batch: WriteBatch,
    next_seq: u64,
    state: TxState,
}

impl<'q> Transaction<'q> {
    pub(super) fn new(queue: &'q BinlogQueue, log: MutexGuard<'q, LogState>) -> Self {
        let next_seq = log.last_seq + 1;
        Self {
            queue,
            log,
            batch: WriteBatch::new(),
            next_seq,
            state: TxState::Open,
        }
    }

    /// Current state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Reads the committed value of `key`. Staged writes are not visible.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.queue.engine().get(key)?)
    }

    /// Stages a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.batch.put(key, value);
    }

    /// Stages a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.batch.delete(key);
    }

    /// Stages a record for the mutation just staged. Records keep their
    /// staging order. Does nothing when the queue is disabled.
    pub fn add_log(&mut self, ty: BinlogType, cmd: BinlogCommand, key: impl Into<Vec<u8>>) {
        if !self.queue.enabled() {
            return;
        }
        let record = Binlog::new(self.next_seq, ty, cmd, key);
        self.batch
            .put(keyspace::encode_synclog(record.seq), record.encode());
        self.next_seq += 1;
    }

    /// Number of records staged so far.
    pub fn staged_records(&self) -> u64 {
        self.next_seq - self.log.last_seq - 1
    }

    /// Writes the batch to the engine in one atomic call.
    ///
    /// On failure nothing from the batch is visible and the error is
    /// returned as is; the caller decides whether to retry from scratch.
    pub fn commit(mut self) -> Result<()> {
        let records = self.staged_records();
        if self.batch.is_empty() {
            self.state = TxState::Committed;
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        let ops = batch.len();
        match self.queue.engine().write(batch) {
            Ok(()) => {
                if records > 0 {
                    if self.log.min_seq == 0 {
                        self.log.min_seq = self.log.last_seq + 1;
                    }
                    self.log.last_seq = self.next_seq - 1;
                }
                self.state = TxState::Committed;
                debug!(ops, records, last_seq = self.log.last_seq, "binlog.commit");
                Ok(())
            }
            Err(err) => {
                self.state = TxState::Aborted;
                self.queue.metrics().commit_failed();
                warn!(error = %err, ops, records, "binlog.commit.failed");
                Err(KvError::Engine(err))
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Open {
            self.state = TxState::Aborted;
            if !self.batch.is_empty() {
                debug!(discarded = self.batch.len(), "binlog.tx.aborted");
            }
        }
    }
}
