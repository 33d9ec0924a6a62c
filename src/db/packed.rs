use tracing::trace;

use super::Db;
use crate::binlog::{BinlogCommand, BinlogType};
use crate::keyspace;
use crate::packed::{self, PackedRecord, SortOrder};
use crate::types::{OpResult, Outcome};

impl Db {
    /// Merges a blob of packed increments into the blob at `key`, sorted
    /// ascending. Returns the record count of the merged blob.
    pub fn incr_packed(&self, key: &[u8], by: &[u8]) -> OpResult<usize> {
        self.merge_packed(key, by, SortOrder::Ascending, "packed.incr")
    }

    /// Like [`Db::incr_packed`], sorted descending (highest score first).
    pub fn incr_zset(&self, key: &[u8], by: &[u8]) -> OpResult<usize> {
        self.merge_packed(key, by, SortOrder::Descending, "packed.incr_zset")
    }

    /// Up to `limit` records of the blob at `key`, in stored order. With
    /// `min_score`, stops at the first record scoring below it.
    pub fn zset_range(
        &self,
        key: &[u8],
        min_score: Option<u32>,
        limit: usize,
    ) -> OpResult<Vec<PackedRecord>> {
        let blob = self.data().get(&keyspace::encode_kv(key))?;
        self.metrics().get(blob.is_some());
        let Some(blob) = blob else {
            return Ok(Outcome::NoOp);
        };
        Ok(Outcome::Done(packed::range_by_score(&blob, min_score, limit)?))
    }

    fn merge_packed(
        &self,
        key: &[u8],
        by: &[u8],
        order: SortOrder,
        op: &'static str,
    ) -> OpResult<usize> {
        if !self.accept_name(key, op)? || by.is_empty() {
            return Ok(Outcome::NoOp);
        }
        let raw = keyspace::encode_kv(key);
        let strategy = self.options().merge_strategy;
        let mut tx = self.binlogs().begin();
        let old = tx.get(&raw)?.unwrap_or_default();
        let (blob, count) = strategy.merge_blobs(&old, by, order)?;
        trace!(
            op,
            strategy = strategy.label(),
            old = old.len() / packed::RECORD_LEN,
            incoming = by.len() / packed::RECORD_LEN,
            merged = count,
            "packed.merge"
        );
        tx.put(raw.clone(), blob);
        tx.add_log(BinlogType::Sync, BinlogCommand::KSet, raw);
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;
    use crate::packed::{encode_blob, MergeStrategy};
    use crate::types::KvError;
    use std::sync::Arc;
    use std::thread;

    fn blob(pairs: &[(u32, u32)]) -> Vec<u8> {
        let records: Vec<PackedRecord> =
            pairs.iter().map(|&(s, m)| PackedRecord::new(s, m)).collect();
        encode_blob(&records)
    }

    fn stored(db: &Db, key: &[u8]) -> Vec<(u32, u32)> {
        db.zset_range(key, None, usize::MAX)
            .unwrap()
            .into_option()
            .unwrap()
            .into_iter()
            .map(|r| (r.score(), r.member()))
            .collect()
    }

    #[test]
    fn merge_scenario_sums_one_member() {
        for strategy in [MergeStrategy::Linear, MergeStrategy::Hashed] {
            let db = Db::open_in_memory(DbOptions::new().merge_strategy(strategy)).unwrap();
            assert_eq!(
                db.incr_zset(b"z", &blob(&[(5, 1), (3, 2)])).unwrap(),
                Outcome::Done(2)
            );
            assert_eq!(db.incr_zset(b"z", &blob(&[(2, 1)])).unwrap(), Outcome::Done(2));
            assert_eq!(stored(&db, b"z"), vec![(7, 1), (3, 2)]);
        }
    }

    #[test]
    fn ascending_path_and_score_filter() {
        let db = Db::open_in_memory(DbOptions::default()).unwrap();
        db.incr_packed(b"p", &blob(&[(9, 1), (1, 2), (4, 3)])).unwrap();
        assert_eq!(stored(&db, b"p"), vec![(1, 2), (4, 3), (9, 1)]);

        db.incr_zset(b"z", &blob(&[(9, 1), (1, 2), (4, 3)])).unwrap();
        let top = db.zset_range(b"z", Some(4), 10).unwrap().into_option().unwrap();
        assert_eq!(top, vec![PackedRecord::new(9, 1), PackedRecord::new(4, 3)]);
        let first = db.zset_range(b"z", None, 1).unwrap().into_option().unwrap();
        assert_eq!(first, vec![PackedRecord::new(9, 1)]);
        assert!(db.zset_range(b"missing", None, 10).unwrap().is_noop());
    }

    #[test]
    fn ragged_input_is_rejected_without_writing() {
        let db = Db::open_in_memory(DbOptions::default()).unwrap();
        assert!(matches!(
            db.incr_zset(b"z", &[0; 7]),
            Err(KvError::InvalidArgument(_))
        ));
        assert!(db.get(b"z").unwrap().is_noop());
        assert_eq!(db.binlogs().last_seq(), 0);
        assert!(db.incr_zset(b"z", b"").unwrap().is_noop());
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let db = Arc::new(Db::open_in_memory(DbOptions::default()).unwrap());
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let db = db.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        db.incr_zset(b"z", &blob(&[(1, 0), (1, t + 1)])).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let records = stored(&db, b"z");
        assert_eq!(records.len(), 5);
        assert_eq!(records[0], (200, 0));
        assert!(records[1..].iter().all(|&(score, _)| score == 50));
    }
}
