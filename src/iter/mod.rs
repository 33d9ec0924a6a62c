#![forbid(unsafe_code)]
//! Bounded range scans over the shared keyspace.
//!
//! [`RangeIter`] walks raw engine entries between a start key and an
//! inclusive end key, up to a count limit, optionally stopping at the first
//! key whose tag differs from the expected one. [`TypedIter`] layers the
//! codec on top: entries that fail to decode are skipped, entries of a
//! different collection end the scan.

use bytes::Bytes;

use crate::engine::{EngineCursor, StorageEngine};
use crate::keyspace::{self, DataType};

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Backward,
}

/// Raw bounded scan. Owns its engine cursor for its whole lifetime.
pub struct RangeIter<'a> {
    cursor: Box<dyn EngineCursor + 'a>,
    end: Option<Vec<u8>>,
    limit: u64,
    direction: Direction,
    tag: Option<u8>,
    values: bool,
    first: bool,
}

impl<'a> RangeIter<'a> {
    /// Ascending scan of keys strictly greater than `start`, up to and
    /// including `end`.
    ///
    /// An entry exactly at `start` is skipped: callers pass the last key
    /// they already consumed.
    pub fn forward(
        engine: &'a dyn StorageEngine,
        start: &[u8],
        end: Option<Vec<u8>>,
        limit: u64,
    ) -> Self {
        let mut cursor = engine.cursor();
        cursor.seek(start);
        if cursor.valid() && cursor.key() == start {
            cursor.next();
        }
        Self::new(cursor, end, limit, Direction::Forward)
    }

    /// Descending scan of keys strictly less than `start`, down to and
    /// including `end`. Starts at the last key when nothing is >= `start`.
    pub fn backward(
        engine: &'a dyn StorageEngine,
        start: &[u8],
        end: Option<Vec<u8>>,
        limit: u64,
    ) -> Self {
        let mut cursor = engine.cursor();
        cursor.seek(start);
        if cursor.valid() {
            cursor.prev();
        } else {
            cursor.seek_to_last();
        }
        Self::new(cursor, end, limit, Direction::Backward)
    }

    fn new(
        cursor: Box<dyn EngineCursor + 'a>,
        end: Option<Vec<u8>>,
        limit: u64,
        direction: Direction,
    ) -> Self {
        Self {
            cursor,
            end: end.filter(|e| !e.is_empty()),
            limit,
            direction,
            tag: None,
            values: true,
            first: true,
        }
    }

    /// Stops the scan at the first key whose tag byte is not `tag`.
    pub fn expect_tag(mut self, tag: u8) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Yields empty values instead of the stored payloads when `false`.
    pub fn return_val(&mut self, on: bool) {
        self.values = on;
    }

    /// Scan direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn stop(&mut self) -> Option<(Vec<u8>, Bytes)> {
        self.limit = 0;
        None
    }
}

impl Iterator for RangeIter<'_> {
    type Item = (Vec<u8>, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        if self.limit == 0 {
            return None;
        }
        if self.first {
            self.first = false;
        } else {
            match self.direction {
                Direction::Forward => self.cursor.next(),
                Direction::Backward => self.cursor.prev(),
            }
        }
        if !self.cursor.valid() {
            return self.stop();
        }
        let key = self.cursor.key();
        if let Some(end) = &self.end {
            let past = match self.direction {
                Direction::Forward => key > end.as_slice(),
                Direction::Backward => key < end.as_slice(),
            };
            if past {
                return self.stop();
            }
        }
        if let Some(tag) = self.tag {
            if key.first() != Some(&tag) {
                return self.stop();
            }
        }
        self.limit -= 1;
        let key = key.to_vec();
        let value = if self.values {
            self.cursor.value().clone()
        } else {
            Bytes::new()
        };
        Some((key, value))
    }
}

/// What a decoder makes of one raw entry.
pub enum Step<T> {
    /// Hand the item to the caller.
    Yield(T),
    /// Ignore the entry and keep scanning.
    Skip,
    /// The scan left the collection.
    Stop,
}

/// Turns raw entries of one tag into typed items.
pub trait EntryDecoder {
    /// Item produced per entry.
    type Item;
    /// Tag this decoder understands.
    const TYPE: DataType;
    /// Decodes one entry.
    fn decode(&self, key: &[u8], value: Bytes) -> Step<Self::Item>;
}

/// Decode-and-filter layer over a [`RangeIter`].
pub struct TypedIter<'a, D: EntryDecoder> {
    inner: RangeIter<'a>,
    decoder: D,
}

impl<'a, D: EntryDecoder> TypedIter<'a, D> {
    /// Wraps `inner`, which is made to stop at the decoder's tag boundary.
    pub fn new(inner: RangeIter<'a>, decoder: D) -> Self {
        Self {
            inner: inner.expect_tag(D::TYPE.tag()),
            decoder,
        }
    }

    /// Skips fetching values when only keys are needed.
    pub fn return_val(mut self, on: bool) -> Self {
        self.inner.return_val(on);
        self
    }
}

impl<D: EntryDecoder> Iterator for TypedIter<'_, D> {
    type Item = D::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((key, value)) = self.inner.next() {
            match self.decoder.decode(&key, value) {
                Step::Yield(item) => return Some(item),
                Step::Skip => continue,
                Step::Stop => {
                    self.inner.limit = 0;
                    return None;
                }
            }
        }
        None
    }
}

/// Flat key/value entries as `(name, value)`.
#[derive(Debug, Default)]
pub struct KvEntries;

impl EntryDecoder for KvEntries {
    type Item = (Vec<u8>, Bytes);
    const TYPE: DataType = DataType::Kv;

    fn decode(&self, key: &[u8], value: Bytes) -> Step<Self::Item> {
        match keyspace::decode_kv(key) {
            Ok(name) => Step::Yield((name, value)),
            Err(_) => Step::Skip,
        }
    }
}

/// Fields of one hash as `(field, value)`.
#[derive(Debug)]
pub struct HashFields {
    name: Vec<u8>,
}

impl HashFields {
    /// Decoder for the hash `name`.
    pub fn new(name: &[u8]) -> Self {
        Self {
            name: name.to_vec(),
        }
    }
}

impl EntryDecoder for HashFields {
    type Item = (Vec<u8>, Bytes);
    const TYPE: DataType = DataType::Hash;

    fn decode(&self, key: &[u8], value: Bytes) -> Step<Self::Item> {
        match keyspace::decode_hash(key) {
            Ok((name, field)) if name == self.name => Step::Yield((field, value)),
            Ok(_) => Step::Stop,
            Err(_) => Step::Skip,
        }
    }
}

/// Score index of one sorted set as `(member, score)`.
#[derive(Debug)]
pub struct ZScores {
    name: Vec<u8>,
}

impl ZScores {
    /// Decoder for the sorted set `name`.
    pub fn new(name: &[u8]) -> Self {
        Self {
            name: name.to_vec(),
        }
    }
}

impl EntryDecoder for ZScores {
    type Item = (Vec<u8>, i64);
    const TYPE: DataType = DataType::ZScore;

    fn decode(&self, key: &[u8], _value: Bytes) -> Step<Self::Item> {
        match keyspace::decode_zscore(key) {
            Ok((name, score, member)) if name == self.name => Step::Yield((member, score)),
            Ok(_) => Step::Stop,
            Err(_) => Step::Skip,
        }
    }
}

/// Items of one queue as `(seq, value)`; sequences below `min_seq` are
/// bookkeeping entries and are skipped.
#[derive(Debug)]
pub struct QueueItems {
    name: Vec<u8>,
    min_seq: u64,
}

impl QueueItems {
    /// Decoder for the queue `name`.
    pub fn new(name: &[u8], min_seq: u64) -> Self {
        Self {
            name: name.to_vec(),
            min_seq,
        }
    }
}

impl EntryDecoder for QueueItems {
    type Item = (u64, Bytes);
    const TYPE: DataType = DataType::Queue;

    fn decode(&self, key: &[u8], value: Bytes) -> Step<Self::Item> {
        match keyspace::decode_queue(key) {
            Ok((name, seq)) if name == self.name && seq >= self.min_seq => {
                Step::Yield((seq, value))
            }
            Ok((name, _)) if name == self.name => Step::Skip,
            Ok(_) => Step::Stop,
            Err(_) => Step::Skip,
        }
    }
}

/// Names of collections found through their size keys (`HSIZE`/`ZSIZE`/`QSIZE`).
#[derive(Debug)]
pub struct SizeNames {
    ty: DataType,
}

impl SizeNames {
    /// Decoder for size keys of `ty`.
    pub fn new(ty: DataType) -> Self {
        Self { ty }
    }
}

/// Iterator over collection names; the size tag is chosen at runtime.
pub struct NameIter<'a> {
    inner: RangeIter<'a>,
    decoder: SizeNames,
}

impl<'a> NameIter<'a> {
    /// Wraps `inner` for size keys of `ty`.
    pub fn new(inner: RangeIter<'a>, ty: DataType) -> Self {
        Self {
            inner: inner.expect_tag(ty.tag()),
            decoder: SizeNames::new(ty),
        }
    }
}

impl Iterator for NameIter<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        for (key, _) in self.inner.by_ref() {
            let decoded = match self.decoder.ty {
                DataType::HSize => keyspace::decode_hsize(&key),
                DataType::ZSize => keyspace::decode_zsize(&key),
                DataType::QSize => keyspace::decode_qsize(&key),
                _ => continue,
            };
            if let Ok(name) = decoded {
                return Some(name);
            }
        }
        None
    }
}

/// Scan over flat keys.
pub type KIterator<'a> = TypedIter<'a, KvEntries>;
/// Scan over the fields of one hash.
pub type HIterator<'a> = TypedIter<'a, HashFields>;
/// Scan over one sorted set in score order.
pub type ZIterator<'a> = TypedIter<'a, ZScores>;
/// Scan over the items of one queue.
pub type QIterator<'a> = TypedIter<'a, QueueItems>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemEngine, WriteBatch};
    use crate::keyspace::{collection_end, collection_prefix, encode_hash, encode_kv};

    fn engine_with(keys: &[Vec<u8>]) -> MemEngine {
        let engine = MemEngine::new();
        let mut batch = WriteBatch::new();
        for (i, key) in keys.iter().enumerate() {
            batch.put(key.clone(), i.to_string().into_bytes());
        }
        engine.write(batch).unwrap();
        engine
    }

    fn raw_keys(iter: RangeIter<'_>) -> Vec<Vec<u8>> {
        iter.map(|(k, _)| k).collect()
    }

    #[test]
    fn forward_skips_exact_start_and_honours_inclusive_end() {
        let engine = engine_with(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        let iter = RangeIter::forward(&engine, b"a", Some(b"c".to_vec()), 10);
        assert_eq!(iter.direction(), Direction::Forward);
        assert_eq!(raw_keys(iter), vec![b"b".to_vec(), b"c".to_vec()]);
        let got = raw_keys(RangeIter::forward(&engine, b"", None, 2));
        assert_eq!(got, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn backward_starts_below_start_or_at_last() {
        let engine = engine_with(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        let iter = RangeIter::backward(&engine, b"c", None, 10);
        assert_eq!(iter.direction(), Direction::Backward);
        assert_eq!(raw_keys(iter), vec![b"b".to_vec(), b"a".to_vec()]);
        let got = raw_keys(RangeIter::backward(&engine, b"z", Some(b"b".to_vec()), 10));
        assert_eq!(got, vec![b"c".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn zero_limit_yields_nothing() {
        let engine = engine_with(&[b"a".to_vec()]);
        assert!(RangeIter::forward(&engine, b"", None, 0).next().is_none());
    }

    #[test]
    fn kv_scan_stops_at_tag_boundary() {
        let mut keys = vec![encode_kv(b"x"), encode_kv(b"y")];
        keys.push(vec![b'q', 0]);
        keys.push(encode_hash(b"h", b"f"));
        let engine = engine_with(&keys);
        let names: Vec<Vec<u8>> = KIterator::new(
            RangeIter::forward(&engine, &encode_kv(b""), None, 100),
            KvEntries,
        )
        .map(|(name, _)| name)
        .collect();
        assert_eq!(names, vec![b"x".to_vec(), b"y".to_vec()]);
    }

    #[test]
    fn hash_scan_stays_inside_its_namespace() {
        let keys = vec![
            encode_hash(b"a", b"f1"),
            encode_hash(b"a", b"f2"),
            encode_hash(b"a\0", b"f9"),
            encode_hash(b"b", b"f1"),
            encode_hash(b"", b"f0"),
        ];
        let engine = engine_with(&keys);
        let prefix = collection_prefix(DataType::Hash, b"a");
        let fields: Vec<Vec<u8>> = HIterator::new(
            RangeIter::forward(&engine, &prefix, Some(collection_end(DataType::Hash, b"a")), 100),
            HashFields::new(b"a"),
        )
        .return_val(false)
        .map(|(field, value)| {
            assert!(value.is_empty());
            field
        })
        .collect();
        assert_eq!(fields, vec![b"f1".to_vec(), b"f2".to_vec()]);
    }

    #[test]
    fn undecodable_entries_are_skipped() {
        let mut keys = vec![encode_hash(b"a", b"f1")];
        // hash tag but no name terminator
        keys.push(vec![b'h', b'a', b'z']);
        let engine = engine_with(&keys);
        let fields: Vec<Vec<u8>> = HIterator::new(
            RangeIter::forward(&engine, &[b'h'], None, 100),
            HashFields::new(b"a"),
        )
        .map(|(f, _)| f)
        .collect();
        assert_eq!(fields, vec![b"f1".to_vec()]);
    }
}
