use bytes::Bytes;

use super::{parse_i64, stage_size, Db};
use crate::binlog::{BinlogCommand, BinlogType, Transaction};
use crate::engine::StorageEngine;
use crate::iter::{QIterator, QueueItems, RangeIter};
use crate::keyspace;
use crate::primitives::bytes::ord;
use crate::types::{KvError, OpResult, Outcome, Result};

/// Sequence of the front pointer entry.
const FRONT_SEQ: u64 = 2;
/// Sequence of the back pointer entry.
const BACK_SEQ: u64 = 3;
/// Smallest sequence an item may take.
pub const QUEUE_ITEM_MIN_SEQ: u64 = 10_000;
/// Largest sequence an item may take.
pub const QUEUE_ITEM_MAX_SEQ: u64 = i64::MAX as u64;
/// Sequence of the first item pushed into an empty queue.
const ITEM_SEQ_INIT: u64 = QUEUE_ITEM_MAX_SEQ / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Front,
    Back,
}

impl End {
    const fn pointer(self) -> u64 {
        match self {
            End::Front => FRONT_SEQ,
            End::Back => BACK_SEQ,
        }
    }

    const fn push(self) -> BinlogCommand {
        match self {
            End::Front => BinlogCommand::QPushFront,
            End::Back => BinlogCommand::QPushBack,
        }
    }

    const fn pop(self) -> BinlogCommand {
        match self {
            End::Front => BinlogCommand::QPopFront,
            End::Back => BinlogCommand::QPopBack,
        }
    }

    /// Sequence one step outward from `seq`.
    fn grow(self, seq: u64) -> Option<u64> {
        match self {
            End::Front => seq.checked_sub(1).filter(|s| *s >= QUEUE_ITEM_MIN_SEQ),
            End::Back => seq.checked_add(1).filter(|s| *s <= QUEUE_ITEM_MAX_SEQ),
        }
    }

    /// Sequence one step inward from `seq`.
    fn shrink(self, seq: u64) -> u64 {
        match self {
            End::Front => seq + 1,
            End::Back => seq - 1,
        }
    }
}

impl Db {
    /// Appends `item` at the back; returns the new length.
    pub fn qpush_back(&self, name: &[u8], item: &[u8]) -> OpResult<i64> {
        self.qpush(name, item, End::Back, "queue.qpush_back")
    }

    /// Prepends `item` at the front; returns the new length.
    pub fn qpush_front(&self, name: &[u8], item: &[u8]) -> OpResult<i64> {
        self.qpush(name, item, End::Front, "queue.qpush_front")
    }

    /// Removes and returns the front item.
    pub fn qpop_front(&self, name: &[u8]) -> OpResult<Bytes> {
        self.qpop(name, End::Front)
    }

    /// Removes and returns the back item.
    pub fn qpop_back(&self, name: &[u8]) -> OpResult<Bytes> {
        self.qpop(name, End::Back)
    }

    /// Length of the queue; no-op when it does not exist.
    pub fn qsize(&self, name: &[u8]) -> OpResult<i64> {
        match self.data().get(&keyspace::encode_qsize(name))? {
            Some(raw) => Ok(Outcome::Done(parse_i64(&raw)?)),
            None => Ok(Outcome::NoOp),
        }
    }

    /// Front item without removing it.
    pub fn qfront(&self, name: &[u8]) -> OpResult<Bytes> {
        self.qpeek(name, End::Front)
    }

    /// Back item without removing it.
    pub fn qback(&self, name: &[u8]) -> OpResult<Bytes> {
        self.qpeek(name, End::Back)
    }

    /// Item at `index`; negative indexes count from the back (`-1` = last).
    pub fn qget(&self, name: &[u8], index: i64) -> OpResult<Bytes> {
        let Some(seq) = self.qseq_at(name, index)? else {
            return Ok(Outcome::NoOp);
        };
        let value = self.data().get(&keyspace::encode_queue(name, seq))?;
        self.metrics().get(value.is_some());
        Ok(value.into())
    }

    /// Up to `limit` items from position `offset` onwards, front to back,
    /// as `(seq, item)`.
    pub fn qrange(&self, name: &[u8], offset: u64, limit: u64) -> Result<QIterator<'_>> {
        self.metrics().scan();
        let decoder = QueueItems::new(name, QUEUE_ITEM_MIN_SEQ);
        let first = i64::try_from(offset)
            .ok()
            .map(|offset| self.qseq_at(name, offset))
            .transpose()?
            .flatten();
        let (from, to, limit) = match (first, read_pointer(self.data(), name, End::Back)?) {
            (Some(first), Some(back)) => (
                keyspace::encode_queue(name, first - 1),
                Some(keyspace::encode_queue(name, back)),
                limit,
            ),
            _ => (keyspace::encode_qsize(name), None, 0),
        };
        Ok(QIterator::new(
            RangeIter::forward(self.data(), &from, to, limit),
            decoder,
        ))
    }

    fn qpush(&self, name: &[u8], item: &[u8], end: End, op: &'static str) -> OpResult<i64> {
        if !self.accept_name(name, op)? {
            return Ok(Outcome::NoOp);
        }
        let size_key = keyspace::encode_qsize(name);
        let mut tx = self.binlogs().begin();
        let size = match tx.get(&size_key)? {
            Some(raw) => parse_i64(&raw)?,
            None => 0,
        };
        let seq = if size <= 0 {
            ITEM_SEQ_INIT
        } else {
            let edge = tx_pointer(&tx, name, end)?.unwrap_or(ITEM_SEQ_INIT);
            end.grow(edge)
                .ok_or_else(|| KvError::InvalidArgument("queue is full".to_string()))?
        };
        let item_key = keyspace::encode_queue(name, seq);
        tx.put(item_key.clone(), item);
        tx.add_log(BinlogType::Sync, end.push(), item_key);
        stage_pointer(&mut tx, name, end, seq);
        if size <= 0 {
            let other = match end {
                End::Front => End::Back,
                End::Back => End::Front,
            };
            stage_pointer(&mut tx, name, other, seq);
        }
        let size = size + 1;
        stage_size(&mut tx, size_key, size, end.push(), end.pop());
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(size))
    }

    fn qpop(&self, name: &[u8], end: End) -> OpResult<Bytes> {
        let size_key = keyspace::encode_qsize(name);
        let mut tx = self.binlogs().begin();
        let size = match tx.get(&size_key)? {
            Some(raw) => parse_i64(&raw)?,
            None => return Ok(Outcome::NoOp),
        };
        let Some(seq) = tx_pointer(&tx, name, end)? else {
            return Err(KvError::decode("queue has a size but no pointer"));
        };
        let item_key = keyspace::encode_queue(name, seq);
        let Some(item) = tx.get(&item_key)? else {
            return Err(KvError::decode(format!("queue item {seq} is missing")));
        };
        tx.delete(item_key.clone());
        tx.add_log(BinlogType::Sync, end.pop(), item_key);
        let size = size - 1;
        if size <= 0 {
            for side in [End::Front, End::Back] {
                let key = keyspace::encode_queue(name, side.pointer());
                tx.delete(key.clone());
                tx.add_log(BinlogType::Sync, end.pop(), key);
            }
        } else {
            stage_pointer(&mut tx, name, end, end.shrink(seq));
        }
        stage_size(&mut tx, size_key, size, end.push(), end.pop());
        tx.commit()?;
        self.metrics().delete();
        Ok(Outcome::Done(item))
    }

    fn qpeek(&self, name: &[u8], end: End) -> OpResult<Bytes> {
        let Some(seq) = read_pointer(self.data(), name, end)? else {
            self.metrics().get(false);
            return Ok(Outcome::NoOp);
        };
        let value = self.data().get(&keyspace::encode_queue(name, seq))?;
        self.metrics().get(value.is_some());
        Ok(value.into())
    }

    fn qseq_at(&self, name: &[u8], index: i64) -> Result<Option<u64>> {
        let size = match self.qsize(name)? {
            Outcome::Done(size) => size,
            Outcome::NoOp => return Ok(None),
        };
        let (end, offset) = if index >= 0 {
            (End::Front, index)
        } else {
            (End::Back, -(index + 1))
        };
        if offset >= size {
            return Ok(None);
        }
        let Some(edge) = read_pointer(self.data(), name, end)? else {
            return Ok(None);
        };
        let seq = match end {
            End::Front => edge + offset as u64,
            End::Back => edge - offset as u64,
        };
        Ok(Some(seq))
    }
}

fn decode_pointer(raw: &[u8]) -> Result<u64> {
    ord::get_u64_be(raw).ok_or_else(|| KvError::decode("queue pointer is not 8 bytes"))
}

fn read_pointer(engine: &dyn StorageEngine, name: &[u8], end: End) -> Result<Option<u64>> {
    match engine.get(&keyspace::encode_queue(name, end.pointer()))? {
        Some(raw) => decode_pointer(&raw).map(Some),
        None => Ok(None),
    }
}

fn tx_pointer(tx: &Transaction<'_>, name: &[u8], end: End) -> Result<Option<u64>> {
    match tx.get(&keyspace::encode_queue(name, end.pointer()))? {
        Some(raw) => decode_pointer(&raw).map(Some),
        None => Ok(None),
    }
}

fn stage_pointer(tx: &mut Transaction<'_>, name: &[u8], end: End, seq: u64) {
    let key = keyspace::encode_queue(name, end.pointer());
    let mut value = Vec::with_capacity(8);
    ord::push_u64_be(&mut value, seq);
    tx.put(key.clone(), value);
    tx.add_log(BinlogType::Sync, end.push(), key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;

    fn db() -> Db {
        Db::open_in_memory(DbOptions::default()).unwrap()
    }

    fn item(s: &str) -> Outcome<Bytes> {
        Outcome::Done(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn pushes_and_pops_from_both_ends() {
        let db = db();
        assert_eq!(db.qpush_back(b"q", b"b").unwrap(), Outcome::Done(1));
        assert_eq!(db.qpush_back(b"q", b"c").unwrap(), Outcome::Done(2));
        assert_eq!(db.qpush_front(b"q", b"a").unwrap(), Outcome::Done(3));
        assert_eq!(db.qfront(b"q").unwrap(), item("a"));
        assert_eq!(db.qback(b"q").unwrap(), item("c"));
        assert_eq!(db.qget(b"q", 1).unwrap(), item("b"));
        assert_eq!(db.qget(b"q", -1).unwrap(), item("c"));
        assert!(db.qget(b"q", 3).unwrap().is_noop());
        assert!(db.qget(b"q", -4).unwrap().is_noop());

        assert_eq!(db.qpop_front(b"q").unwrap(), item("a"));
        assert_eq!(db.qpop_back(b"q").unwrap(), item("c"));
        assert_eq!(db.qsize(b"q").unwrap(), Outcome::Done(1));
        assert_eq!(db.qpop_back(b"q").unwrap(), item("b"));
        assert!(db.qsize(b"q").unwrap().is_noop());
        assert!(db.qpop_front(b"q").unwrap().is_noop());
        assert!(db.qfront(b"q").unwrap().is_noop());
    }

    #[test]
    fn emptied_queue_leaves_no_keys() {
        let db = db();
        db.qpush_back(b"q", b"x").unwrap();
        db.qpop_front(b"q").unwrap();
        let prefix = keyspace::collection_prefix(crate::keyspace::DataType::Queue, b"q");
        let left = RangeIter::forward(db.data(), &[0], None, u64::MAX)
            .filter(|(k, _)| k.starts_with(&prefix) || k.first() == Some(&b'Q'))
            .count();
        assert_eq!(left, 0);
        assert_eq!(db.qpush_front(b"q", b"y").unwrap(), Outcome::Done(1));
        assert_eq!(db.qback(b"q").unwrap(), item("y"));
    }

    #[test]
    fn qrange_walks_front_to_back() {
        let db = db();
        for v in ["1", "2", "3", "4"] {
            db.qpush_back(b"q", v.as_bytes()).unwrap();
        }
        db.qpush_front(b"q", b"0").unwrap();
        db.qpush_back(b"r", b"other").unwrap();
        let items: Vec<Bytes> = db.qrange(b"q", 0, 10).unwrap().map(|(_, v)| v).collect();
        assert_eq!(items, ["0", "1", "2", "3", "4"].map(Bytes::from));
        let tail: Vec<Bytes> = db.qrange(b"q", 3, 10).unwrap().map(|(_, v)| v).collect();
        assert_eq!(tail, vec![Bytes::from("3"), Bytes::from("4")]);
        assert_eq!(db.qrange(b"q", 1, 2).unwrap().count(), 2);
        assert_eq!(db.qrange(b"q", 9, 10).unwrap().count(), 0);
        assert_eq!(db.qrange(b"missing", 0, 10).unwrap().count(), 0);
    }

    #[test]
    fn pops_are_logged_for_replay() {
        let db = db();
        db.qpush_back(b"q", b"x").unwrap();
        db.qpop_back(b"q").unwrap();
        let cmds: Vec<BinlogCommand> = db
            .binlogs()
            .read_from(0, 100)
            .unwrap()
            .into_iter()
            .map(|log| log.cmd)
            .collect();
        assert_eq!(cmds[0], BinlogCommand::QPushBack);
        assert!(cmds.contains(&BinlogCommand::QPopBack));
        assert!(cmds.iter().all(|c| c.is_set() || c.is_delete()));
    }
}
