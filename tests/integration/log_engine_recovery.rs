//! Durability of a database on `LogEngine` across reopen, torn tails and reclaim.

use std::fs::OpenOptions;
use std::io::Write;

use bytes::Bytes;
use tagkv::{Db, DbOptions, KvError, Outcome, SyncMode};

fn value(s: &str) -> Outcome<Bytes> {
    Outcome::Done(Bytes::copy_from_slice(s.as_bytes()))
}

#[test]
fn every_data_type_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Db::open(dir.path(), DbOptions::new().sync_mode(SyncMode::Full)).unwrap();
        db.set(b"k", b"v").unwrap();
        db.hset(b"h", b"f", b"1").unwrap();
        db.zset(b"z", b"m", 42).unwrap();
        db.qpush_back(b"q", b"item").unwrap();
        db.incr(b"n", 9).unwrap();
    }
    let db = Db::open(dir.path(), DbOptions::default()).unwrap();
    assert_eq!(db.get(b"k").unwrap(), value("v"));
    assert_eq!(db.hget(b"h", b"f").unwrap(), value("1"));
    assert_eq!(db.zget(b"z", b"m").unwrap(), Outcome::Done(42));
    assert_eq!(db.qfront(b"q").unwrap(), value("item"));
    assert_eq!(db.get(b"n").unwrap(), value("9"));
    let last = db.binlogs().last_seq();
    assert!(last > 5);
    assert_eq!(db.binlogs().min_seq(), 1);

    db.set(b"after", b"reopen").unwrap();
    assert_eq!(db.binlogs().last_seq(), last + 1);
}

#[test]
fn torn_tail_drops_only_the_partial_batch() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Db::open(dir.path(), DbOptions::default()).unwrap();
        db.multi_set(&[("a", "1"), ("b", "2")]).unwrap();
    }
    {
        let mut log = OpenOptions::new()
            .append(true)
            .open(dir.path().join("data").join("engine.log"))
            .unwrap();
        log.write_all(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 64, 1]).unwrap();
    }
    let db = Db::open(dir.path(), DbOptions::default()).unwrap();
    assert_eq!(db.get(b"a").unwrap(), value("1"));
    assert_eq!(db.get(b"b").unwrap(), value("2"));
    assert_eq!(db.binlogs().last_seq(), 2);
    db.set(b"c", b"3").unwrap();
    drop(db);

    let db = Db::open(dir.path(), DbOptions::default()).unwrap();
    assert_eq!(db.get(b"c").unwrap(), value("3"));
}

#[test]
fn compaction_and_reclaim_keep_live_state() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Db::open(dir.path(), DbOptions::new().binlog_capacity(4)).unwrap();
        for i in 0..20 {
            db.set(b"k", i.to_string().as_bytes()).unwrap();
        }
        assert_eq!(db.reclaim_binlog().unwrap(), 16);
        db.compact().unwrap();
    }
    let db = Db::open(dir.path(), DbOptions::new().binlog_capacity(4)).unwrap();
    assert_eq!(db.get(b"k").unwrap(), value("19"));
    assert_eq!(db.binlogs().min_seq(), 17);
    assert_eq!(db.binlogs().last_seq(), 20);
}

#[test]
fn reclaimed_log_keeps_counting_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let options = || DbOptions::new().binlog_capacity(1);
    {
        let db = Db::open(dir.path(), options()).unwrap();
        for i in 0..5 {
            db.set(b"k", i.to_string().as_bytes()).unwrap();
        }
        assert_eq!(db.reclaim_binlog().unwrap(), 4);
    }
    let db = Db::open(dir.path(), options()).unwrap();
    assert_eq!(db.binlogs().last_seq(), 5);
    db.set(b"k", b"after").unwrap();
    let tail = db.binlogs().read_from(5, 10).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].seq, 6);
    drop(db);

    assert!(matches!(
        Db::open(dir.path(), DbOptions::new().binlog_capacity(0)),
        Err(KvError::InvalidArgument(_))
    ));
}
