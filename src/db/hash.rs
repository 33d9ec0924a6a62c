use bytes::Bytes;

use super::{parse_i64, read_size, stage_size, Db};
use crate::binlog::{BinlogCommand, BinlogType};
use crate::iter::{HIterator, HashFields, NameIter, RangeIter};
use crate::keyspace::{self, DataType};
use crate::types::{KvError, OpResult, Outcome};

impl Db {
    /// Sets `field` of hash `name`. Returns `true` when the field is new.
    pub fn hset(&self, name: &[u8], field: &[u8], value: &[u8]) -> OpResult<bool> {
        if !self.accept_name(name, "hash.hset")? || field.is_empty() {
            return Ok(Outcome::NoOp);
        }
        let key = keyspace::encode_hash(name, field);
        let size_key = keyspace::encode_hsize(name);
        let mut tx = self.binlogs().begin();
        let created = tx.get(&key)?.is_none();
        tx.put(key.clone(), value);
        tx.add_log(BinlogType::Sync, BinlogCommand::HSet, key);
        if created {
            let size = read_size(&tx, &size_key)? + 1;
            stage_size(&mut tx, size_key, size, BinlogCommand::HSet, BinlogCommand::HDel);
        }
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(created))
    }

    /// Value of `field` in hash `name`.
    pub fn hget(&self, name: &[u8], field: &[u8]) -> OpResult<Bytes> {
        let value = self.data().get(&keyspace::encode_hash(name, field))?;
        self.metrics().get(value.is_some());
        Ok(value.into())
    }

    /// Removes `field` from hash `name`; no-op when absent.
    pub fn hdel(&self, name: &[u8], field: &[u8]) -> OpResult<()> {
        let key = keyspace::encode_hash(name, field);
        let size_key = keyspace::encode_hsize(name);
        let mut tx = self.binlogs().begin();
        if tx.get(&key)?.is_none() {
            return Ok(Outcome::NoOp);
        }
        tx.delete(key.clone());
        tx.add_log(BinlogType::Sync, BinlogCommand::HDel, key);
        let size = read_size(&tx, &size_key)? - 1;
        stage_size(&mut tx, size_key, size, BinlogCommand::HSet, BinlogCommand::HDel);
        tx.commit()?;
        self.metrics().delete();
        Ok(Outcome::Done(()))
    }

    /// Number of fields in hash `name`; no-op when the hash does not exist.
    pub fn hsize(&self, name: &[u8]) -> OpResult<i64> {
        match self.data().get(&keyspace::encode_hsize(name))? {
            Some(raw) => Ok(Outcome::Done(parse_i64(&raw)?)),
            None => Ok(Outcome::NoOp),
        }
    }

    /// Adds `by` to the integer in `field` and returns the new value.
    pub fn hincr(&self, name: &[u8], field: &[u8], by: i64) -> OpResult<i64> {
        if !self.accept_name(name, "hash.hincr")? || field.is_empty() {
            return Ok(Outcome::NoOp);
        }
        let key = keyspace::encode_hash(name, field);
        let size_key = keyspace::encode_hsize(name);
        let mut tx = self.binlogs().begin();
        let old = tx.get(&key)?;
        let value = match &old {
            Some(raw) => parse_i64(raw)?
                .checked_add(by)
                .ok_or_else(|| KvError::InvalidArgument("hincr overflow".to_string()))?,
            None => by,
        };
        tx.put(key.clone(), value.to_string());
        tx.add_log(BinlogType::Sync, BinlogCommand::HSet, key);
        if old.is_none() {
            let size = read_size(&tx, &size_key)? + 1;
            stage_size(&mut tx, size_key, size, BinlogCommand::HSet, BinlogCommand::HDel);
        }
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(value))
    }

    /// Fields of `name` after `start` up to and including `end` (empty =
    /// to the end of the hash), ascending.
    pub fn hscan(&self, name: &[u8], start: &[u8], end: &[u8], limit: u64) -> HIterator<'_> {
        self.metrics().scan();
        let from = keyspace::encode_hash(name, start);
        let to = if end.is_empty() {
            keyspace::collection_end(DataType::Hash, name)
        } else {
            keyspace::encode_hash(name, end)
        };
        HIterator::new(
            RangeIter::forward(self.data(), &from, Some(to), limit),
            HashFields::new(name),
        )
    }

    /// Fields of `name` before `start` (empty = from the last field) down
    /// to and including `end`, descending.
    pub fn hrscan(&self, name: &[u8], start: &[u8], end: &[u8], limit: u64) -> HIterator<'_> {
        self.metrics().scan();
        let from = if start.is_empty() {
            keyspace::collection_end(DataType::Hash, name)
        } else {
            keyspace::encode_hash(name, start)
        };
        let to = keyspace::encode_hash(name, end);
        HIterator::new(
            RangeIter::backward(self.data(), &from, Some(to), limit),
            HashFields::new(name),
        )
    }

    /// Names of hashes after `start` up to and including `end`.
    pub fn hlist(&self, start: &[u8], end: &[u8], limit: u64) -> NameIter<'_> {
        self.metrics().scan();
        let end = (!end.is_empty()).then(|| keyspace::encode_hsize(end));
        NameIter::new(
            RangeIter::forward(self.data(), &keyspace::encode_hsize(start), end, limit),
            DataType::HSize,
        )
    }

    /// Deletes every field of `name` in one batch; returns how many.
    pub fn hclear(&self, name: &[u8]) -> OpResult<u64> {
        let mut tx = self.binlogs().begin();
        let fields: Vec<Vec<u8>> = self
            .hscan(name, b"", b"", u64::MAX)
            .return_val(false)
            .map(|(field, _)| field)
            .collect();
        if fields.is_empty() {
            return Ok(Outcome::NoOp);
        }
        for field in &fields {
            let key = keyspace::encode_hash(name, field);
            tx.delete(key.clone());
            tx.add_log(BinlogType::Sync, BinlogCommand::HDel, key);
        }
        stage_size(
            &mut tx,
            keyspace::encode_hsize(name),
            0,
            BinlogCommand::HSet,
            BinlogCommand::HDel,
        );
        tx.commit()?;
        self.metrics().delete();
        Ok(Outcome::Done(fields.len() as u64))
    }
}
