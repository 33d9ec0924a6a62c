#![forbid(unsafe_code)]
//! Packed sorted-set values: a blob of 8-byte big-endian records, each
//! holding a 32-bit score in the high half and a 32-bit member id in the
//! low half.
//!
//! [`merge_increment`] folds a blob of increments into an existing blob:
//! scores of matching members are summed (wrapping at 32 bits), unknown
//! members are appended, and the result is re-sorted by packed value. How
//! members are looked up during the merge is behind [`MemberIndex`].

use rustc_hash::FxHashMap;

use crate::primitives::bytes::ord;
use crate::types::{KvError, Result};

/// Width of one packed record.
pub const RECORD_LEN: usize = 8;

/// One `(score, member)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackedRecord(u64);

impl PackedRecord {
    /// Packs `score` into the high and `member` into the low 32 bits.
    pub const fn new(score: u32, member: u32) -> Self {
        Self(((score as u64) << 32) | member as u64)
    }

    /// Wraps an already packed value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Packed value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Score half.
    pub const fn score(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Member half.
    pub const fn member(self) -> u32 {
        self.0 as u32
    }

    fn add_score(self, by: u32) -> Self {
        Self::new(self.score().wrapping_add(by), self.member())
    }
}

/// Order the merged blob is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Lowest packed value first.
    Ascending,
    /// Highest packed value first (highest score first).
    Descending,
}

/// Splits a blob into records. Its length must be a multiple of
/// [`RECORD_LEN`].
pub fn decode_blob(blob: &[u8]) -> Result<Vec<PackedRecord>> {
    if blob.len() % RECORD_LEN != 0 {
        return Err(KvError::InvalidArgument(format!(
            "packed blob length {} is not a multiple of {RECORD_LEN}",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(RECORD_LEN)
        .filter_map(ord::get_u64_be)
        .map(PackedRecord::from_raw)
        .collect())
}

/// Concatenates records as big-endian values.
pub fn encode_blob(records: &[PackedRecord]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.len() * RECORD_LEN);
    for rec in records {
        ord::push_u64_be(&mut buf, rec.raw());
    }
    buf
}

/// Member lookup used while merging.
pub trait MemberIndex {
    /// Prepares for a merge into `records`.
    fn load(&mut self, records: &[PackedRecord]);
    /// Position of `member` in `records`, if present.
    fn find(&self, records: &[PackedRecord], member: u32) -> Option<usize>;
    /// Notes that `member` was appended at `pos`.
    fn appended(&mut self, member: u32, pos: usize);
}

/// Scans the records for every lookup; O(existing x incoming).
#[derive(Debug, Default)]
pub struct LinearIndex;

impl MemberIndex for LinearIndex {
    fn load(&mut self, _records: &[PackedRecord]) {}

    fn find(&self, records: &[PackedRecord], member: u32) -> Option<usize> {
        records.iter().position(|r| r.member() == member)
    }

    fn appended(&mut self, _member: u32, _pos: usize) {}
}

/// Hash map from member id to position.
#[derive(Debug, Default)]
pub struct HashedIndex {
    positions: FxHashMap<u32, usize>,
}

impl MemberIndex for HashedIndex {
    fn load(&mut self, records: &[PackedRecord]) {
        self.positions.clear();
        self.positions.reserve(records.len());
        for (pos, rec) in records.iter().enumerate() {
            self.positions.entry(rec.member()).or_insert(pos);
        }
    }

    fn find(&self, _records: &[PackedRecord], member: u32) -> Option<usize> {
        self.positions.get(&member).copied()
    }

    fn appended(&mut self, member: u32, pos: usize) {
        self.positions.insert(member, pos);
    }
}

/// Merges `incoming` into `records` and sorts the result.
///
/// Each incoming member already present (including one appended earlier
/// in the same call) has its score increased; any other is appended.
pub fn merge_increment<I: MemberIndex>(
    records: &mut Vec<PackedRecord>,
    incoming: &[PackedRecord],
    index: &mut I,
    order: SortOrder,
) {
    index.load(records);
    for inc in incoming {
        match index.find(records, inc.member()) {
            Some(pos) => records[pos] = records[pos].add_score(inc.score()),
            None => {
                index.appended(inc.member(), records.len());
                records.push(*inc);
            }
        }
    }
    match order {
        SortOrder::Ascending => records.sort_unstable(),
        SortOrder::Descending => records.sort_unstable_by(|a, b| b.cmp(a)),
    }
}

/// Member lookup chosen at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// [`LinearIndex`].
    #[default]
    Linear,
    /// [`HashedIndex`].
    Hashed,
}

impl MergeStrategy {
    /// Decodes both blobs, merges, and returns the new blob with its
    /// record count.
    pub fn merge_blobs(self, old: &[u8], by: &[u8], order: SortOrder) -> Result<(Vec<u8>, usize)> {
        let mut records = decode_blob(old)?;
        let incoming = decode_blob(by)?;
        match self {
            MergeStrategy::Linear => {
                merge_increment(&mut records, &incoming, &mut LinearIndex, order)
            }
            MergeStrategy::Hashed => {
                merge_increment(&mut records, &incoming, &mut HashedIndex::default(), order)
            }
        }
        Ok((encode_blob(&records), records.len()))
    }

    /// Lowercase label.
    pub const fn label(self) -> &'static str {
        match self {
            MergeStrategy::Linear => "linear",
            MergeStrategy::Hashed => "hashed",
        }
    }
}

/// Reads records from a sorted blob.
///
/// With `min_score`, stops at the first record scoring below it. At most
/// `limit` records are returned.
pub fn range_by_score(
    blob: &[u8],
    min_score: Option<u32>,
    limit: usize,
) -> Result<Vec<PackedRecord>> {
    let records = decode_blob(blob)?;
    let take = records.into_iter().take(limit);
    Ok(match min_score {
        Some(min) => take.take_while(|r| r.score() >= min).collect(),
        None => take.collect(),
    })
}
