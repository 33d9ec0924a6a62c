use super::{parse_i64, read_size, stage_size, Db};
use crate::binlog::{BinlogCommand, BinlogType, Transaction};
use crate::iter::{NameIter, RangeIter, ZIterator, ZScores};
use crate::keyspace::{self, DataType};
use crate::types::{KvError, OpResult, Outcome, Result};

impl Db {
    /// Sets the score of `member`. Returns `true` when the member is new.
    pub fn zset(&self, name: &[u8], member: &[u8], score: i64) -> OpResult<bool> {
        if !self.accept_name(name, "zset.zset")? || member.is_empty() {
            return Ok(Outcome::NoOp);
        }
        let mut tx = self.binlogs().begin();
        let created = stage_score(&mut tx, name, member, |_| Ok(score))?.is_none();
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(created))
    }

    /// Score of `member`.
    pub fn zget(&self, name: &[u8], member: &[u8]) -> OpResult<i64> {
        let value = self.data().get(&keyspace::encode_zset(name, member))?;
        self.metrics().get(value.is_some());
        match value {
            Some(raw) => Ok(Outcome::Done(parse_i64(&raw)?)),
            None => Ok(Outcome::NoOp),
        }
    }

    /// Adds `by` to the score of `member` (0 when absent) and returns the
    /// new score.
    pub fn zincr(&self, name: &[u8], member: &[u8], by: i64) -> OpResult<i64> {
        if !self.accept_name(name, "zset.zincr")? || member.is_empty() {
            return Ok(Outcome::NoOp);
        }
        let mut tx = self.binlogs().begin();
        let mut new_score = by;
        stage_score(&mut tx, name, member, |old| {
            new_score = old
                .unwrap_or(0)
                .checked_add(by)
                .ok_or_else(|| KvError::InvalidArgument("zincr overflow".to_string()))?;
            Ok(new_score)
        })?;
        tx.commit()?;
        self.metrics().set();
        Ok(Outcome::Done(new_score))
    }

    /// Removes `member`; no-op when absent.
    pub fn zdel(&self, name: &[u8], member: &[u8]) -> OpResult<()> {
        let key = keyspace::encode_zset(name, member);
        let mut tx = self.binlogs().begin();
        let Some(raw) = tx.get(&key)? else {
            return Ok(Outcome::NoOp);
        };
        let old = parse_i64(&raw)?;
        let index = keyspace::encode_zscore(name, old, member);
        tx.delete(key.clone());
        tx.add_log(BinlogType::Sync, BinlogCommand::ZDel, key);
        tx.delete(index.clone());
        tx.add_log(BinlogType::Sync, BinlogCommand::ZDel, index);
        let size_key = keyspace::encode_zsize(name);
        let size = read_size(&tx, &size_key)? - 1;
        stage_size(&mut tx, size_key, size, BinlogCommand::ZSet, BinlogCommand::ZDel);
        tx.commit()?;
        self.metrics().delete();
        Ok(Outcome::Done(()))
    }

    /// Number of members; no-op when the set does not exist.
    pub fn zsize(&self, name: &[u8]) -> OpResult<i64> {
        match self.data().get(&keyspace::encode_zsize(name))? {
            Some(raw) => Ok(Outcome::Done(parse_i64(&raw)?)),
            None => Ok(Outcome::NoOp),
        }
    }

    /// Members of `name` in ascending score order with scores in
    /// `[min, max]` (`None` = unbounded).
    pub fn zscan(
        &self,
        name: &[u8],
        min: Option<i64>,
        max: Option<i64>,
        limit: u64,
    ) -> ZIterator<'_> {
        self.metrics().scan();
        let prefix = keyspace::collection_prefix(DataType::ZScore, name);
        let from = match min {
            Some(min) => keyspace::encode_zscore(name, min, b""),
            None => prefix.clone(),
        };
        let to = match max.and_then(|max| max.checked_add(1)) {
            Some(above) => keyspace::encode_zscore(name, above, b""),
            None => keyspace::collection_end(DataType::ZScore, name),
        };
        ZIterator::new(
            RangeIter::forward(self.data(), &from, Some(to), limit),
            ZScores::new(name),
        )
    }

    /// Names of sorted sets after `start` up to and including `end`.
    pub fn zlist(&self, start: &[u8], end: &[u8], limit: u64) -> NameIter<'_> {
        self.metrics().scan();
        let end = (!end.is_empty()).then(|| keyspace::encode_zsize(end));
        NameIter::new(
            RangeIter::forward(self.data(), &keyspace::encode_zsize(start), end, limit),
            DataType::ZSize,
        )
    }
}

/// Stages the member, its score index entry and the size counter.
/// `score` maps the current score to the new one. Returns the old score.
fn stage_score(
    tx: &mut Transaction<'_>,
    name: &[u8],
    member: &[u8],
    score: impl FnOnce(Option<i64>) -> Result<i64>,
) -> Result<Option<i64>> {
    let key = keyspace::encode_zset(name, member);
    let old = match tx.get(&key)? {
        Some(raw) => Some(parse_i64(&raw)?),
        None => None,
    };
    let new = score(old)?;
    if old == Some(new) {
        return Ok(old);
    }
    if let Some(old) = old {
        let stale = keyspace::encode_zscore(name, old, member);
        tx.delete(stale.clone());
        tx.add_log(BinlogType::Sync, BinlogCommand::ZDel, stale);
    }
    tx.put(key.clone(), new.to_string());
    tx.add_log(BinlogType::Sync, BinlogCommand::ZSet, key);
    let index = keyspace::encode_zscore(name, new, member);
    tx.put(index.clone(), Vec::new());
    tx.add_log(BinlogType::Sync, BinlogCommand::ZSet, index);
    if old.is_none() {
        let size_key = keyspace::encode_zsize(name);
        let size = read_size(tx, &size_key)? + 1;
        stage_size(tx, size_key, size, BinlogCommand::ZSet, BinlogCommand::ZDel);
    }
    Ok(old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;

    fn db() -> Db {
        Db::open_in_memory(DbOptions::default()).unwrap()
    }

    fn members(iter: ZIterator<'_>) -> Vec<(String, i64)> {
        iter.map(|(m, s)| (String::from_utf8(m).unwrap(), s)).collect()
    }

    #[test]
    fn scores_move_the_index_entry() {
        let db = db();
        assert_eq!(db.zset(b"z", b"a", 5).unwrap(), Outcome::Done(true));
        assert_eq!(db.zset(b"z", b"b", -3).unwrap(), Outcome::Done(true));
        assert_eq!(db.zset(b"z", b"a", 1).unwrap(), Outcome::Done(false));
        assert_eq!(db.zget(b"z", b"a").unwrap(), Outcome::Done(1));
        assert_eq!(db.zsize(b"z").unwrap(), Outcome::Done(2));
        assert_eq!(
            members(db.zscan(b"z", None, None, 10)),
            vec![("b".to_string(), -3), ("a".to_string(), 1)]
        );
    }

    #[test]
    fn zincr_and_zdel() {
        let db = db();
        assert_eq!(db.zincr(b"z", b"m", 4).unwrap(), Outcome::Done(4));
        assert_eq!(db.zincr(b"z", b"m", -10).unwrap(), Outcome::Done(-6));
        assert_eq!(db.zsize(b"z").unwrap(), Outcome::Done(1));
        assert!(db.zdel(b"z", b"m").unwrap().is_done());
        assert!(db.zdel(b"z", b"m").unwrap().is_noop());
        assert!(db.zsize(b"z").unwrap().is_noop());
        assert!(db.zscan(b"z", None, None, 10).next().is_none());
    }

    #[test]
    fn zscan_bounds_are_inclusive() {
        let db = db();
        for (m, s) in [("a", 1), ("b", 2), ("c", 2), ("d", 3), ("e", 9)] {
            db.zset(b"z", m.as_bytes(), s).unwrap();
        }
        db.zset(b"y", b"x", 2).unwrap();
        assert_eq!(
            members(db.zscan(b"z", Some(2), Some(3), 10)),
            vec![("b".to_string(), 2), ("c".to_string(), 2), ("d".to_string(), 3)]
        );
        assert_eq!(members(db.zscan(b"z", Some(4), None, 10)), vec![("e".to_string(), 9)]);
        let names: Vec<Vec<u8>> = db.zlist(b"", b"", 10).collect();
        assert_eq!(names, vec![b"y".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn zscan_reaches_the_largest_scores() {
        let db = db();
        db.zset(b"z", b"top", i64::MAX).unwrap();
        db.zset(b"z", b"high", 0x7f00_0000_0000_0001).unwrap();
        db.zset(b"z", b"low", i64::MIN).unwrap();
        db.zset(b"z", b"one", 1).unwrap();
        db.zset(b"z\x00", b"next", 5).unwrap();
        assert_eq!(db.zsize(b"z").unwrap(), Outcome::Done(4));
        assert_eq!(
            members(db.zscan(b"z", None, None, 10)),
            vec![
                ("low".to_string(), i64::MIN),
                ("one".to_string(), 1),
                ("high".to_string(), 0x7f00_0000_0000_0001),
                ("top".to_string(), i64::MAX),
            ]
        );
        assert_eq!(
            members(db.zscan(b"z", Some(2), Some(i64::MAX), 10)),
            vec![("high".to_string(), 0x7f00_0000_0000_0001), ("top".to_string(), i64::MAX)]
        );
    }
}
