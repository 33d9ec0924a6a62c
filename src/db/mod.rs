//! The database handle and its operation sets.
//!
//! A [`Db`] owns three engines: `data` (every typed key plus the binlog),
//! `expiry` (`key -> absolute expiry second as decimal text`) and `meta`
//! (replication positions). Each mutating operation reads what it needs,
//! stages writes and binlog records in one [`Transaction`], and commits once.
//!
//! [`Transaction`]: crate::binlog::Transaction

mod config;
mod hash;
mod kv;
pub mod metrics;
mod options;
mod packed;
mod queue;
mod zset;

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{info, warn};

pub use config::{Config, ConfigError};
pub use options::DbOptions;
pub use queue::{QUEUE_ITEM_MAX_SEQ, QUEUE_ITEM_MIN_SEQ};

use crate::binlog::{BinlogCommand, BinlogQueue, BinlogType, Transaction};
use crate::engine::{LogEngine, MemEngine, StorageEngine, PROP_STATS};
use crate::iter::RangeIter;
use crate::keyspace::{DataType, TypedKey};
use crate::types::{KvError, OpResult, Outcome, Result};

use self::metrics::OpMetrics;

/// Longest accepted key or collection name.
pub const KEY_LEN_MAX: usize = 255;

/// Regions reported by [`Db::key_range`].
pub const KEY_RANGE_TYPES: [DataType; 3] = [DataType::Kv, DataType::HSize, DataType::ZSize];

/// First and last name stored in one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRange {
    /// Region.
    pub data_type: DataType,
    /// Smallest name, `None` when the region is empty.
    pub first: Option<Vec<u8>>,
    /// Largest name, `None` when the region is empty.
    pub last: Option<Vec<u8>>,
}

/// Handle to an open database.
pub struct Db {
    data: Arc<dyn StorageEngine>,
    expiry: Arc<dyn StorageEngine>,
    meta: Arc<dyn StorageEngine>,
    binlogs: BinlogQueue,
    options: DbOptions,
}

impl Db {
    /// Opens or creates a database under `dir` (`data/`, `expiry/`, `meta/`).
    pub fn open(dir: impl AsRef<Path>, options: DbOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let sync = options.sync_mode;
        let data: Arc<dyn StorageEngine> = Arc::new(LogEngine::open(dir.join("data"), sync)?);
        let expiry: Arc<dyn StorageEngine> =
            Arc::new(LogEngine::open(dir.join("expiry"), sync)?);
        let meta: Arc<dyn StorageEngine> = Arc::new(LogEngine::open(dir.join("meta"), sync)?);
        info!(dir = %dir.display(), "db.open");
        Self::with_engines(data, expiry, meta, options)
    }

    /// Opens a database whose three engines live in memory.
    pub fn open_in_memory(options: DbOptions) -> Result<Self> {
        Self::with_engines(
            Arc::new(MemEngine::new()),
            Arc::new(MemEngine::new()),
            Arc::new(MemEngine::new()),
            options,
        )
    }

    /// Builds a database over caller-supplied engines.
    pub fn with_engines(
        data: Arc<dyn StorageEngine>,
        expiry: Arc<dyn StorageEngine>,
        meta: Arc<dyn StorageEngine>,
        options: DbOptions,
    ) -> Result<Self> {
        info!(
            sync_mode = ?options.sync_mode,
            binlog_capacity = options.binlog_capacity,
            binlog_enabled = options.binlog_enabled,
            merge_strategy = options.merge_strategy.label(),
            "db.options"
        );
        let binlogs = BinlogQueue::open(
            data.clone(),
            options.binlog_config(),
            options.metrics.clone(),
        )?;
        Ok(Self {
            data,
            expiry,
            meta,
            binlogs,
            options,
        })
    }

    /// The binlog of the data engine.
    pub fn binlogs(&self) -> &BinlogQueue {
        &self.binlogs
    }

    /// Options the database was opened with.
    pub fn options(&self) -> &DbOptions {
        &self.options
    }

    pub(crate) fn data(&self) -> &dyn StorageEngine {
        self.data.as_ref()
    }

    pub(crate) fn meta(&self) -> &dyn StorageEngine {
        self.meta.as_ref()
    }

    pub(crate) fn metrics(&self) -> &dyn OpMetrics {
        self.options.metrics.as_ref()
    }

    /// Empty names are a no-op for writes; overlong names are an error.
    pub(crate) fn accept_name(&self, name: &[u8], op: &'static str) -> Result<bool> {
        if name.is_empty() {
            warn!(op, "db.empty_key");
            return Ok(false);
        }
        if name.len() > KEY_LEN_MAX {
            return Err(KvError::KeyTooLong {
                len: name.len(),
                max: KEY_LEN_MAX,
            });
        }
        Ok(true)
    }

    /// Reads a storage key as is.
    pub fn raw_get(&self, key: &[u8]) -> OpResult<Bytes> {
        Ok(self.data.get(key)?.into())
    }

    /// Writes a storage key without a binlog record.
    pub fn raw_set(&self, key: &[u8], value: &[u8]) -> OpResult<()> {
        self.data.put(key, value)?;
        Ok(Outcome::Done(()))
    }

    /// Deletes a storage key without a binlog record.
    pub fn raw_del(&self, key: &[u8]) -> OpResult<()> {
        self.data.delete(key)?;
        Ok(Outcome::Done(()))
    }

    /// Raw entries after `start` up to and including `end`, binlog records
    /// included.
    pub fn raw_scan(&self, start: &[u8], end: Option<Vec<u8>>, limit: u64) -> RangeIter<'_> {
        self.metrics().scan();
        RangeIter::forward(self.data(), start, end, limit)
    }

    /// Sets `key` to expire `ttl_secs` seconds from now.
    pub fn expiry_set(&self, key: &[u8], ttl_secs: i64) -> OpResult<()> {
        let at = now_secs().saturating_add(ttl_secs);
        self.expiry.put(key, at.to_string().as_bytes())?;
        Ok(Outcome::Done(()))
    }

    /// Remaining seconds before `key` expires; no-op when it has no TTL.
    pub fn expiry_get(&self, key: &[u8]) -> OpResult<i64> {
        let Some(raw) = self.expiry.get(key)? else {
            return Ok(Outcome::NoOp);
        };
        let at = parse_i64(&raw)?;
        Ok(Outcome::Done(at - now_secs()))
    }

    /// Removes the TTL of `key`.
    pub fn expiry_del(&self, key: &[u8]) -> OpResult<()> {
        if self.expiry.get(key)?.is_none() {
            return Ok(Outcome::NoOp);
        }
        self.expiry.delete(key)?;
        Ok(Outcome::Done(()))
    }

    /// Diagnostic `(name, value)` pairs: engine stats and binlog positions.
    pub fn info(&self) -> Vec<(String, String)> {
        let mut info = Vec::new();
        if let Some(stats) = self.data.property(PROP_STATS) {
            info.push((PROP_STATS.to_string(), stats));
        }
        info.push(("binlog".to_string(), self.binlogs.stats()));
        if let Some(report) = self.metrics().report() {
            info.push(("metrics".to_string(), report));
        }
        info
    }

    /// Compacts the whole data engine.
    pub fn compact(&self) -> Result<()> {
        self.data.compact_range(None, None)?;
        Ok(())
    }

    /// Drops binlog records beyond the configured capacity.
    pub fn reclaim_binlog(&self) -> Result<u64> {
        self.binlogs.reclaim()
    }

    /// First and last names of every region in [`KEY_RANGE_TYPES`].
    pub fn key_range(&self) -> Result<Vec<RegionRange>> {
        KEY_RANGE_TYPES
            .iter()
            .map(|&ty| {
                let tag = ty.tag();
                let first = RangeIter::forward(self.data(), &[tag], None, u64::MAX)
                    .expect_tag(tag);
                let last = RangeIter::backward(self.data(), &[tag + 1], None, u64::MAX)
                    .expect_tag(tag);
                Ok(RegionRange {
                    data_type: ty,
                    first: first_name(first),
                    last: first_name(last),
                })
            })
            .collect()
    }
}

fn first_name(iter: RangeIter<'_>) -> Option<Vec<u8>> {
    iter.filter_map(|(key, _)| TypedKey::decode(&key).ok())
        .map(|key| key.name().to_vec())
        .next()
}

/// Reads a decimal size counter, 0 when absent.
pub(crate) fn read_size(tx: &Transaction<'_>, key: &[u8]) -> Result<i64> {
    match tx.get(key)? {
        Some(raw) => parse_i64(&raw),
        None => Ok(0),
    }
}

/// Stages a size counter update; a size of 0 removes the counter.
pub(crate) fn stage_size(
    tx: &mut Transaction<'_>,
    key: Vec<u8>,
    size: i64,
    set: BinlogCommand,
    del: BinlogCommand,
) {
    if size <= 0 {
        tx.delete(key.clone());
        tx.add_log(BinlogType::Sync, del, key);
    } else {
        tx.put(key.clone(), size.to_string());
        tx.add_log(BinlogType::Sync, set, key);
    }
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parses decimal text stored as a value.
pub(crate) fn parse_i64(raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            KvError::decode(format!(
                "value is not an integer: {}",
                crate::primitives::bytes::Dump(raw)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::metrics::CounterMetrics;

    fn db() -> Db {
        Db::open_in_memory(DbOptions::default()).unwrap()
    }

    #[test]
    fn raw_access_bypasses_binlog() {
        let db = db();
        db.raw_set(b"kraw", b"1").unwrap();
        assert_eq!(db.raw_get(b"kraw").unwrap(), Outcome::Done(Bytes::from_static(b"1")));
        assert_eq!(db.binlogs().last_seq(), 0);
        let seen: Vec<Vec<u8>> = db
            .raw_scan(b"j", Some(b"l".to_vec()), 10)
            .map(|(k, _)| k)
            .collect();
        assert_eq!(seen, vec![b"kraw".to_vec()]);
        db.raw_del(b"kraw").unwrap();
        assert!(db.raw_get(b"kraw").unwrap().is_noop());
    }

    #[test]
    fn expiry_reports_remaining_seconds() {
        let db = db();
        assert!(db.expiry_get(b"k").unwrap().is_noop());
        db.expiry_set(b"k", 100).unwrap();
        let left = db.expiry_get(b"k").unwrap().into_option().unwrap();
        assert!((98..=100).contains(&left));
        assert!(db.expiry_del(b"k").unwrap().is_done());
        assert!(db.expiry_del(b"k").unwrap().is_noop());
    }

    #[test]
    fn overlong_names_are_errors_and_empty_ones_noops() {
        let db = db();
        let long = vec![b'x'; KEY_LEN_MAX + 1];
        assert!(matches!(db.set(&long, b"v"), Err(KvError::KeyTooLong { .. })));
        assert!(db.set(b"", b"v").unwrap().is_noop());
        assert!(db.set(&long[..KEY_LEN_MAX], b"v").unwrap().is_done());
    }

    #[test]
    fn key_range_covers_each_region() {
        let db = db();
        db.set(b"b", b"1").unwrap();
        db.set(b"a", b"1").unwrap();
        db.set(b"c", b"1").unwrap();
        db.hset(b"h1", b"f", b"v").unwrap();
        db.hset(b"h2", b"f", b"v").unwrap();
        let ranges = db.key_range().unwrap();
        assert_eq!(ranges.len(), 3);
        let kv = &ranges[0];
        assert_eq!(kv.data_type, DataType::Kv);
        assert_eq!(kv.first.as_deref(), Some(&b"a"[..]));
        assert_eq!(kv.last.as_deref(), Some(&b"c"[..]));
        let hsize = &ranges[1];
        assert_eq!(hsize.first.as_deref(), Some(&b"h1"[..]));
        assert_eq!(hsize.last.as_deref(), Some(&b"h2"[..]));
        assert_eq!(ranges[2].first, None);
    }

    #[test]
    fn info_includes_engine_and_binlog() {
        let metrics = Arc::new(CounterMetrics::default());
        let db = Db::open_in_memory(DbOptions::new().metrics(metrics.clone())).unwrap();
        db.set(b"k", b"v").unwrap();
        db.get(b"k").unwrap();
        db.get(b"missing").unwrap();
        let info = db.info();
        assert!(info.iter().any(|(k, v)| k == PROP_STATS && v.contains("entries:")));
        assert!(info.iter().any(|(_, v)| v.contains("binlog.last_seq: 1")));
        assert!(metrics.summary().starts_with("gets: 2\nempty.gets: 1\nsets: 1"));
        assert!(info.iter().any(|(k, _)| k == "metrics"));
        db.compact().unwrap();
    }

    #[test]
    fn on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Db::open(dir.path(), DbOptions::default()).unwrap();
            db.set(b"k", b"v").unwrap();
            db.expiry_set(b"k", 60).unwrap();
        }
        let db = Db::open(dir.path(), DbOptions::default()).unwrap();
        assert_eq!(db.get(b"k").unwrap(), Outcome::Done(Bytes::from_static(b"v")));
        assert!(db.expiry_get(b"k").unwrap().is_done());
        assert_eq!(db.binlogs().last_seq(), 1);
    }
}
