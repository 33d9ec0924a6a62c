#![forbid(unsafe_code)]
//! Replicable log of mutation records stored beside the data it describes.
//!
//! Records live in the data engine under `SYNCLOG | seq` and are written in
//! the same [`WriteBatch`] as the mutations they describe, so a record exists
//! exactly when its mutation does. Record value layout:
//!
//! ```text
//! | seq (u64 BE) | type (u8) | command (u8) | crc32 (u32 BE) | key ... |
//! ```
//!
//! The CRC covers every other field.

mod transaction;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

pub use transaction::{Transaction, TxState};

use crate::db::metrics::OpMetrics;
use crate::engine::{StorageEngine, WriteBatch};
use crate::keyspace::{self, SYNCLOG};
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::{ord, Dump};
use crate::types::{record_crc32, KvError, Result};

/// Why a record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinlogType {
    /// Position marker; replays nothing.
    Noop = 0,
    /// Local write, or a write replayed from a sync master.
    Sync = 1,
    /// Write replayed from a mirror peer.
    Mirror = 2,
    /// Emitted while copying a full snapshot to a replica.
    Copy = 3,
}

impl BinlogType {
    /// Parses the stored byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => BinlogType::Noop,
            1 => BinlogType::Sync,
            2 => BinlogType::Mirror,
            3 => BinlogType::Copy,
            _ => return None,
        })
    }

    /// Lowercase label.
    pub const fn label(self) -> &'static str {
        match self {
            BinlogType::Noop => "noop",
            BinlogType::Sync => "sync",
            BinlogType::Mirror => "mirror",
            BinlogType::Copy => "copy",
        }
    }
}

/// Logical mutation a record stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinlogCommand {
    /// No mutation.
    None = 0,
    /// Flat key set.
    KSet = 1,
    /// Flat key delete.
    KDel = 2,
    /// Hash field set.
    HSet = 3,
    /// Hash field delete.
    HDel = 4,
    /// Sorted set member set.
    ZSet = 5,
    /// Sorted set member delete.
    ZDel = 6,
    /// Start of a framed group.
    Begin = 7,
    /// End of a framed group.
    End = 8,
    /// Queue push at the back.
    QPushBack = 10,
    /// Queue push at the front.
    QPushFront = 11,
    /// Queue pop at the back.
    QPopBack = 12,
    /// Queue pop at the front.
    QPopFront = 13,
}

impl BinlogCommand {
    /// Parses the stored byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => BinlogCommand::None,
            1 => BinlogCommand::KSet,
            2 => BinlogCommand::KDel,
            3 => BinlogCommand::HSet,
            4 => BinlogCommand::HDel,
            5 => BinlogCommand::ZSet,
            6 => BinlogCommand::ZDel,
            7 => BinlogCommand::Begin,
            8 => BinlogCommand::End,
            10 => BinlogCommand::QPushBack,
            11 => BinlogCommand::QPushFront,
            12 => BinlogCommand::QPopBack,
            13 => BinlogCommand::QPopFront,
            _ => return None,
        })
    }

    /// Whether replaying the command means copying the key's current value.
    pub const fn is_set(self) -> bool {
        matches!(
            self,
            BinlogCommand::KSet
                | BinlogCommand::HSet
                | BinlogCommand::ZSet
                | BinlogCommand::QPushBack
                | BinlogCommand::QPushFront
        )
    }

    /// Whether replaying the command means deleting the key.
    pub const fn is_delete(self) -> bool {
        matches!(
            self,
            BinlogCommand::KDel
                | BinlogCommand::HDel
                | BinlogCommand::ZDel
                | BinlogCommand::QPopBack
                | BinlogCommand::QPopFront
        )
    }

    /// Lowercase label.
    pub const fn label(self) -> &'static str {
        match self {
            BinlogCommand::None => "none",
            BinlogCommand::KSet => "kset",
            BinlogCommand::KDel => "kdel",
            BinlogCommand::HSet => "hset",
            BinlogCommand::HDel => "hdel",
            BinlogCommand::ZSet => "zset",
            BinlogCommand::ZDel => "zdel",
            BinlogCommand::Begin => "begin",
            BinlogCommand::End => "end",
            BinlogCommand::QPushBack => "qpush_back",
            BinlogCommand::QPushFront => "qpush_front",
            BinlogCommand::QPopBack => "qpop_back",
            BinlogCommand::QPopFront => "qpop_front",
        }
    }
}

/// One committed log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binlog {
    /// Position in the log, starting at 1.
    pub seq: u64,
    /// Why the record exists.
    pub ty: BinlogType,
    /// Mutation it stands for.
    pub cmd: BinlogCommand,
    /// Encoded storage key the mutation touched.
    pub key: Vec<u8>,
}

const RECORD_HEADER_LEN: usize = 8 + 1 + 1 + 4;

impl Binlog {
    /// Creates a record.
    pub fn new(seq: u64, ty: BinlogType, cmd: BinlogCommand, key: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            ty,
            cmd,
            key: key.into(),
        }
    }

    /// Storage key of this record.
    pub fn storage_key(&self) -> Vec<u8> {
        keyspace::encode_synclog(self.seq)
    }

    fn checksum(seq: &[u8], ty: u8, cmd: u8, key: &[u8]) -> u32 {
        record_crc32(&[seq, &[ty, cmd], key])
    }

    /// Serializes the record value.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + self.key.len());
        ord::push_u64_be(&mut buf, self.seq);
        buf.push(self.ty as u8);
        buf.push(self.cmd as u8);
        let crc = Self::checksum(&buf[..8], self.ty as u8, self.cmd as u8, &self.key);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf
    }

    /// Parses a record value, verifying its checksum.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(raw);
        let seq_bytes = cur.take(8)?;
        let ty_byte = cur.u8()?;
        let cmd_byte = cur.u8()?;
        let stored = cur.u32_be()?;
        let key = cur.rest();
        let actual = Self::checksum(seq_bytes, ty_byte, cmd_byte, key);
        if stored != actual {
            return Err(KvError::decode(format!(
                "binlog checksum mismatch: stored {stored:#010x}, computed {actual:#010x}"
            )));
        }
        let ty = BinlogType::from_u8(ty_byte)
            .ok_or_else(|| KvError::decode(format!("unknown binlog type {ty_byte}")))?;
        let cmd = BinlogCommand::from_u8(cmd_byte)
            .ok_or_else(|| KvError::decode(format!("unknown binlog command {cmd_byte}")))?;
        let seq = ord::get_u64_be(seq_bytes).ok_or_else(|| KvError::decode("binlog seq"))?;
        Ok(Self::new(seq, ty, cmd, key))
    }
}

impl fmt::Display for Binlog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.seq,
            self.ty.label(),
            self.cmd.label(),
            Dump(&self.key)
        )
    }
}

/// Settings for a [`BinlogQueue`].
#[derive(Debug, Clone, Copy)]
pub struct BinlogConfig {
    /// Records kept by [`BinlogQueue::reclaim`].
    pub capacity: u64,
    /// Whether transactions stage records at all.
    pub enabled: bool,
}

impl Default for BinlogConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000_000,
            enabled: true,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct LogState {
    pub(crate) last_seq: u64,
    pub(crate) min_seq: u64,
}

/// Ordered log over the data engine, and the entry point for transactions.
///
/// At most one [`Transaction`] is open at a time: it holds the queue's
/// lock from creation until commit or drop, which serializes writers and
/// keeps record order equal to commit order.
pub struct BinlogQueue {
    engine: Arc<dyn StorageEngine>,
    state: Mutex<LogState>,
    config: BinlogConfig,
    metrics: Arc<dyn OpMetrics>,
}

impl BinlogQueue {
    /// Opens the log stored in `engine`, recovering its bounds.
    ///
    /// The capacity must be at least 1: the newest record is what carries
    /// `last_seq` across a reopen.
    pub fn open(
        engine: Arc<dyn StorageEngine>,
        config: BinlogConfig,
        metrics: Arc<dyn OpMetrics>,
    ) -> Result<Self> {
        if config.capacity == 0 {
            return Err(KvError::InvalidArgument(
                "binlog capacity must be at least 1".to_string(),
            ));
        }
        let (min_seq, last_seq) = recover_bounds(engine.as_ref())?;
        info!(
            min_seq,
            last_seq,
            capacity = config.capacity,
            enabled = config.enabled,
            "binlog.open"
        );
        Ok(Self {
            engine,
            state: Mutex::new(LogState { last_seq, min_seq }),
            config,
            metrics,
        })
    }

    /// Starts a transaction, waiting for any open one to finish.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self, self.state.lock())
    }

    /// Sequence of the newest committed record, 0 when empty.
    pub fn last_seq(&self) -> u64 {
        self.state.lock().last_seq
    }

    /// Sequence of the oldest retained record, 0 when empty.
    pub fn min_seq(&self) -> u64 {
        self.state.lock().min_seq
    }

    /// Whether transactions stage records.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub(crate) fn engine(&self) -> &dyn StorageEngine {
        self.engine.as_ref()
    }

    pub(crate) fn metrics(&self) -> &dyn OpMetrics {
        self.metrics.as_ref()
    }

    /// Record at exactly `seq`.
    pub fn get(&self, seq: u64) -> Result<Option<Binlog>> {
        match self.engine.get(&keyspace::encode_synclog(seq))? {
            Some(raw) => Binlog::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// First record with sequence >= `seq`.
    pub fn find_next(&self, seq: u64) -> Result<Option<Binlog>> {
        Ok(self.read_range(seq, 1)?.pop())
    }

    /// Up to `limit` records with sequence > `after`, in order.
    pub fn read_from(&self, after: u64, limit: usize) -> Result<Vec<Binlog>> {
        match after.checked_add(1) {
            Some(from) => self.read_range(from, limit),
            None => Ok(Vec::new()),
        }
    }

    fn read_range(&self, from: u64, limit: usize) -> Result<Vec<Binlog>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        let mut cursor = self.engine.cursor();
        cursor.seek(&keyspace::encode_synclog(from));
        while cursor.valid() && out.len() < limit {
            if cursor.key().first() != Some(&SYNCLOG) {
                break;
            }
            out.push(Binlog::decode(cursor.value())?);
            cursor.next();
        }
        Ok(out)
    }

    /// Deletes the oldest records beyond the configured capacity. Returns
    /// the number deleted.
    pub fn reclaim(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if state.last_seq == 0 || state.last_seq - state.min_seq < self.config.capacity {
            return Ok(0);
        }
        let keep_from = state.last_seq - self.config.capacity + 1;
        let mut batch = WriteBatch::new();
        for seq in state.min_seq..keep_from {
            batch.delete(keyspace::encode_synclog(seq));
        }
        let removed = batch.len() as u64;
        self.engine.write(batch)?;
        debug!(
            from = state.min_seq,
            to = keep_from,
            removed,
            "binlog.reclaimed"
        );
        state.min_seq = keep_from;
        Ok(removed)
    }

    /// Human-readable positions for `info`.
    pub fn stats(&self) -> String {
        let state = self.state.lock();
        format!(
            "binlog.enabled: {}\nbinlog.min_seq: {}\nbinlog.last_seq: {}\nbinlog.capacity: {}",
            self.config.enabled, state.min_seq, state.last_seq, self.config.capacity
        )
    }
}

fn recover_bounds(engine: &dyn StorageEngine) -> Result<(u64, u64)> {
    let mut cursor = engine.cursor();
    cursor.seek(&[SYNCLOG]);
    if !cursor.valid() || cursor.key().first() != Some(&SYNCLOG) {
        return Ok((0, 0));
    }
    let min_seq = keyspace::decode_synclog(cursor.key())?;
    cursor.seek(&[SYNCLOG + 1]);
    if cursor.valid() {
        cursor.prev();
    } else {
        cursor.seek_to_last();
    }
    let last_seq = keyspace::decode_synclog(cursor.key())?;
    Ok((min_seq, last_seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::metrics::NoopMetrics;
    use crate::engine::MemEngine;

    fn queue(engine: Arc<dyn StorageEngine>, capacity: u64) -> BinlogQueue {
        BinlogQueue::open(
            engine,
            BinlogConfig {
                capacity,
                enabled: true,
            },
            Arc::new(NoopMetrics),
        )
        .unwrap()
    }

    fn commit_sets(q: &BinlogQueue, keys: &[&[u8]]) {
        let mut tx = q.begin();
        for key in keys {
            tx.put(key.to_vec(), b"v".to_vec());
            tx.add_log(BinlogType::Sync, BinlogCommand::KSet, key.to_vec());
        }
        tx.commit().unwrap();
    }

    #[test]
    fn record_roundtrip_and_corruption() {
        let rec = Binlog::new(9, BinlogType::Mirror, BinlogCommand::HDel, b"hkey".to_vec());
        let mut raw = rec.encode();
        assert_eq!(Binlog::decode(&raw).unwrap(), rec);
        let last = raw.len() - 1;
        raw[last] ^= 0x20;
        assert!(matches!(Binlog::decode(&raw), Err(KvError::Decode(_))));
        assert!(Binlog::decode(&raw[..5]).is_err());
    }

    #[test]
    fn commands_split_into_set_and_delete() {
        for v in 0..=13u8 {
            let Some(cmd) = BinlogCommand::from_u8(v) else {
                assert_eq!(v, 9);
                continue;
            };
            assert_eq!(cmd as u8, v);
            assert!(!(cmd.is_set() && cmd.is_delete()));
        }
        assert!(BinlogCommand::QPushFront.is_set());
        assert!(BinlogCommand::QPopBack.is_delete());
        assert!(!BinlogCommand::Begin.is_set() && !BinlogCommand::Begin.is_delete());
    }

    #[test]
    fn sequences_follow_commit_order() {
        let engine: Arc<dyn StorageEngine> = Arc::new(MemEngine::new());
        let q = queue(engine.clone(), 100);
        commit_sets(&q, &[b"a", b"b"]);
        commit_sets(&q, &[b"c"]);
        assert_eq!(q.last_seq(), 3);
        assert_eq!(q.min_seq(), 1);
        let all = q.read_from(0, 10).unwrap();
        let keys: Vec<Vec<u8>> = all.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(q.read_from(2, 10).unwrap().len(), 1);
        assert_eq!(q.find_next(2).unwrap().unwrap().key, b"b");
        assert!(q.get(4).unwrap().is_none());

        let reopened = queue(engine, 100);
        assert_eq!((reopened.min_seq(), reopened.last_seq()), (1, 3));
    }

    #[test]
    fn reclaim_keeps_newest_capacity_records() {
        let engine: Arc<dyn StorageEngine> = Arc::new(MemEngine::new());
        let q = queue(engine, 2);
        commit_sets(&q, &[b"a", b"b", b"c", b"d"]);
        assert_eq!(q.reclaim().unwrap(), 2);
        assert_eq!(q.min_seq(), 3);
        assert!(q.get(2).unwrap().is_none());
        assert_eq!(q.find_next(0).unwrap().unwrap().seq, 3);
        assert_eq!(q.reclaim().unwrap(), 0);
    }

    #[test]
    fn reclaim_never_moves_last_seq_back() {
        let engine: Arc<dyn StorageEngine> = Arc::new(MemEngine::new());
        let q = queue(engine.clone(), 1);
        commit_sets(&q, &[b"a", b"b", b"c"]);
        assert_eq!(q.reclaim().unwrap(), 2);
        drop(q);
        let q = queue(engine.clone(), 1);
        assert_eq!((q.min_seq(), q.last_seq()), (3, 3));
        commit_sets(&q, &[b"d"]);
        assert_eq!(q.read_from(3, 10).unwrap()[0].seq, 4);

        let zero = BinlogQueue::open(
            engine,
            BinlogConfig {
                capacity: 0,
                enabled: true,
            },
            Arc::new(NoopMetrics),
        );
        assert!(matches!(zero, Err(KvError::InvalidArgument(_))));
    }

    #[test]
    fn data_scans_never_see_records() {
        let engine: Arc<dyn StorageEngine> = Arc::new(MemEngine::new());
        let q = queue(engine.clone(), 10);
        let key = keyspace::encode_kv(b"x");
        commit_sets(&q, &[key.as_slice()]);
        let mut cursor = engine.cursor();
        cursor.seek(&keyspace::encode_kv(b""));
        assert_eq!(cursor.key(), keyspace::encode_kv(b"x").as_slice());
    }
}
