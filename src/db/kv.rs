use bytes::Bytes;
use tracing::warn;

use super::{parse_i64, Db};
use crate::binlog::{BinlogCommand, BinlogType};
use crate::iter::{KIterator, KvEntries, RangeIter};
use crate::keyspace::{self, DataType};
use crate::types::{KvError, OpResult, Outcome};

impl Db {
    /// Value of `key`.
    pub fn get(&self, key: &[u8]) -> OpResult<Bytes> {
        let value = self.data().get(&keyspace::encode_kv(key))?;
        self.metrics().get(value.is_some());
        Ok(value.into())
    }

    /// Whether `key` holds a value.
    pub fn exists(&self, key: &[u8]) -> OpResult<()> {
        Ok(self.get(key)?.map(|_| ()))
    }

    /// Sets `key` to `value`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> OpResult<()> {
        if !self.accept_name(key, "kv.set")? {
            return Ok(Outcome::NoOp);
        }
        let raw = keyspace::encode_kv(key);
        let mut tx = self.binlogs().begin();
        tx.put(raw.clone(), value);
        tx.add_log(BinlogType::Sync, BinlogCommand::KSet, raw);
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(()))
    }

    /// Sets `key` only if it holds nothing; no-op otherwise.
    pub fn setnx(&self, key: &[u8], value: &[u8]) -> OpResult<()> {
        if !self.accept_name(key, "kv.setnx")? {
            return Ok(Outcome::NoOp);
        }
        let raw = keyspace::encode_kv(key);
        let mut tx = self.binlogs().begin();
        if tx.get(&raw)?.is_some() {
            return Ok(Outcome::NoOp);
        }
        tx.put(raw.clone(), value);
        tx.add_log(BinlogType::Sync, BinlogCommand::KSet, raw);
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(()))
    }

    /// Sets `key` and returns its previous value.
    ///
    /// The write happens either way; the outcome is a no-op when there was
    /// no previous value.
    pub fn getset(&self, key: &[u8], value: &[u8]) -> OpResult<Bytes> {
        if !self.accept_name(key, "kv.getset")? {
            return Ok(Outcome::NoOp);
        }
        let raw = keyspace::encode_kv(key);
        let mut tx = self.binlogs().begin();
        let old = tx.get(&raw)?;
        tx.put(raw.clone(), value);
        tx.add_log(BinlogType::Sync, BinlogCommand::KSet, raw);
        tx.commit()?;
        self.metrics().set();
        Ok(old.into())
    }

    /// Deletes `key`. Deleting an absent key still logs the delete.
    pub fn del(&self, key: &[u8]) -> OpResult<()> {
        let raw = keyspace::encode_kv(key);
        let mut tx = self.binlogs().begin();
        tx.delete(raw.clone());
        tx.add_log(BinlogType::Sync, BinlogCommand::KDel, raw);
        tx.commit()?;
        self.metrics().delete();
        Ok(Outcome::Done(()))
    }

    /// Sets every pair in one batch and returns the number of pairs.
    ///
    /// Any empty key turns the whole call into a no-op.
    pub fn multi_set<K, V>(&self, pairs: &[(K, V)]) -> OpResult<usize>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut tx = self.binlogs().begin();
        for (key, value) in pairs {
            if !self.accept_name(key.as_ref(), "kv.multi_set")? {
                return Ok(Outcome::NoOp);
            }
            let raw = keyspace::encode_kv(key.as_ref());
            tx.put(raw.clone(), value.as_ref());
            tx.add_log(BinlogType::Sync, BinlogCommand::KSet, raw);
        }
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(pairs.len()))
    }

    /// Deletes every key in one batch and returns the number of keys.
    pub fn multi_del<K: AsRef<[u8]>>(&self, keys: &[K]) -> OpResult<usize> {
        let mut tx = self.binlogs().begin();
        for key in keys {
            let raw = keyspace::encode_kv(key.as_ref());
            tx.delete(raw.clone());
            tx.add_log(BinlogType::Sync, BinlogCommand::KDel, raw);
        }
        tx.commit()?;
        self.metrics().delete();
        Ok(Outcome::Done(keys.len()))
    }

    /// Adds `by` to the decimal integer at `key` and returns the new value.
    ///
    /// An absent key starts from 0. A value that is not an integer is a
    /// decode error and is left untouched.
    pub fn incr(&self, key: &[u8], by: i64) -> OpResult<i64> {
        if !self.accept_name(key, "kv.incr")? {
            return Ok(Outcome::NoOp);
        }
        let raw = keyspace::encode_kv(key);
        let mut tx = self.binlogs().begin();
        let value = match tx.get(&raw)? {
            None => by,
            Some(old) => {
                let old = match parse_i64(&old) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(error = %err, "kv.incr.malformed");
                        return Err(err);
                    }
                };
                old.checked_add(by).ok_or_else(|| {
                    KvError::InvalidArgument(format!("incr overflow: {old} + {by}"))
                })?
            }
        };
        tx.put(raw.clone(), value.to_string());
        tx.add_log(BinlogType::Sync, BinlogCommand::KSet, raw);
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(value))
    }

    /// Keys after `start` up to and including `end` (empty = no bound), in
    /// ascending order.
    pub fn scan(&self, start: &[u8], end: &[u8], limit: u64) -> KIterator<'_> {
        self.metrics().scan();
        let end = (!end.is_empty()).then(|| keyspace::encode_kv(end));
        KIterator::new(
            RangeIter::forward(self.data(), &keyspace::encode_kv(start), end, limit),
            KvEntries,
        )
    }

    /// Keys before `start` (empty = from the last key) down to and
    /// including `end`, in descending order.
    pub fn rscan(&self, start: &[u8], end: &[u8], limit: u64) -> KIterator<'_> {
        self.metrics().scan();
        let from = if start.is_empty() {
            keyspace::tag_end(DataType::Kv)
        } else {
            keyspace::encode_kv(start)
        };
        let end = (!end.is_empty()).then(|| keyspace::encode_kv(end));
        KIterator::new(RangeIter::backward(self.data(), &from, end, limit), KvEntries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;
    use crate::engine::{MemEngine, StorageEngine};
    use std::sync::Arc;

    fn db() -> Db {
        Db::open_in_memory(DbOptions::default()).unwrap()
    }

    fn bytes(s: &str) -> Outcome<Bytes> {
        Outcome::Done(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn set_get_getset_del_scenario() {
        let db = db();
        assert!(db.set(b"k", b"v1").unwrap().is_done());
        assert_eq!(db.get(b"k").unwrap(), bytes("v1"));
        assert_eq!(db.getset(b"k", b"v2").unwrap(), bytes("v1"));
        assert_eq!(db.get(b"k").unwrap(), bytes("v2"));
        assert!(db.del(b"k").unwrap().is_done());
        assert!(db.get(b"k").unwrap().is_noop());
        assert!(db.exists(b"k").unwrap().is_noop());
    }

    #[test]
    fn getset_on_fresh_key_sets_and_reports_noop() {
        let db = db();
        assert!(db.getset(b"k", b"v").unwrap().is_noop());
        assert_eq!(db.get(b"k").unwrap(), bytes("v"));
    }

    #[test]
    fn setnx_only_writes_fresh_keys() {
        let db = db();
        assert!(db.setnx(b"k", b"first").unwrap().is_done());
        let seq = db.binlogs().last_seq();
        assert!(db.setnx(b"k", b"second").unwrap().is_noop());
        assert_eq!(db.get(b"k").unwrap(), bytes("first"));
        assert_eq!(db.binlogs().last_seq(), seq);
    }

    #[test]
    fn incr_initializes_and_rejects_garbage() {
        let db = db();
        assert_eq!(db.incr(b"n", 5).unwrap(), Outcome::Done(5));
        assert_eq!(db.incr(b"n", -7).unwrap(), Outcome::Done(-2));
        assert_eq!(db.get(b"n").unwrap(), bytes("-2"));
        db.set(b"bad", b"12abc").unwrap();
        assert!(matches!(db.incr(b"bad", 1), Err(KvError::Decode(_))));
        assert_eq!(db.get(b"bad").unwrap(), bytes("12abc"));
        db.set(b"max", i64::MAX.to_string().as_bytes()).unwrap();
        assert!(matches!(db.incr(b"max", 1), Err(KvError::InvalidArgument(_))));
    }

    #[test]
    fn multi_ops_are_one_batch() {
        let db = db();
        let pairs = [("a", "1"), ("b", "2"), ("c", "3")];
        assert_eq!(db.multi_set(&pairs).unwrap(), Outcome::Done(3));
        assert_eq!(db.binlogs().last_seq(), 3);
        assert!(db.multi_set(&[("d", "4"), ("", "5")]).unwrap().is_noop());
        assert!(db.get(b"d").unwrap().is_noop());
        assert_eq!(db.multi_del(&["a", "c", "zz"]).unwrap(), Outcome::Done(3));
        let left: Vec<Vec<u8>> = db.scan(b"", b"", 10).map(|(k, _)| k).collect();
        assert_eq!(left, vec![b"b".to_vec()]);
    }

    #[test]
    fn failed_multi_set_is_invisible() {
        let data = Arc::new(MemEngine::new());
        let db = Db::with_engines(
            data.clone(),
            Arc::new(MemEngine::new()),
            Arc::new(MemEngine::new()),
            DbOptions::default(),
        )
        .unwrap();
        data.set_fail_writes(true);
        assert!(matches!(
            db.multi_set(&[("a", "1"), ("b", "2")]),
            Err(KvError::Engine(_))
        ));
        data.set_fail_writes(false);
        assert!(data.is_empty());
        assert!(data.get(&keyspace::encode_synclog(1)).unwrap().is_none());
    }

    #[test]
    fn scans_respect_bounds_and_direction() {
        let db = db();
        for k in ["a", "b", "c", "d"] {
            db.set(k.as_bytes(), k.as_bytes()).unwrap();
        }
        db.hset(b"a", b"f", b"v").unwrap();
        let fwd: Vec<Vec<u8>> = db.scan(b"a", b"c", 10).map(|(k, _)| k).collect();
        assert_eq!(fwd, vec![b"b".to_vec(), b"c".to_vec()]);
        let rev: Vec<Vec<u8>> = db.rscan(b"", b"b", 10).map(|(k, _)| k).collect();
        assert_eq!(rev, vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec()]);
        let all: Vec<(Vec<u8>, Bytes)> = db.scan(b"", b"", 2).collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].1.as_ref(), b"b");
    }

    #[test]
    fn reverse_scan_starts_at_keys_with_high_bytes() {
        let db = db();
        db.set(b"a", b"1").unwrap();
        db.set(b"\xff\x01", b"2").unwrap();
        db.qpush_back(b"q", b"item").unwrap();
        let rev: Vec<Vec<u8>> = db.rscan(b"", b"", 10).map(|(k, _)| k).collect();
        assert_eq!(rev, vec![b"\xff\x01".to_vec(), b"a".to_vec()]);
    }
}
