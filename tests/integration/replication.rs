//! Binlog replay from a primary into a target database.

use tagkv::keyspace::SYNCLOG;
use tagkv::packed::encode_blob;
use tagkv::{Db, DbOptions, PackedRecord, Replica, ReplicaMode};

/// Every stored entry after the binlog region, in key order.
fn data_entries(db: &Db) -> Vec<(Vec<u8>, Vec<u8>)> {
    db.raw_scan(&[SYNCLOG + 1], None, u64::MAX)
        .map(|(key, value)| (key, value.to_vec()))
        .collect()
}

fn populate(db: &Db) {
    db.set(b"user:1", b"ada").unwrap();
    db.set(b"user:2", b"bob").unwrap();
    db.del(b"user:2").unwrap();
    db.incr(b"visits", 3).unwrap();
    db.hset(b"profile", b"lang", b"rust").unwrap();
    db.hset(b"profile", b"tz", b"utc").unwrap();
    db.hdel(b"profile", b"tz").unwrap();
    db.zset(b"scores", b"ada", 10).unwrap();
    db.zincr(b"scores", b"bob", 4).unwrap();
    db.zset(b"scores", b"ada", 12).unwrap();
    db.qpush_back(b"jobs", b"a").unwrap();
    db.qpush_back(b"jobs", b"b").unwrap();
    db.qpush_front(b"jobs", b"z").unwrap();
    db.qpop_back(b"jobs").unwrap();
    let board = encode_blob(&[PackedRecord::new(5, 1), PackedRecord::new(3, 2)]);
    db.incr_zset(b"board", &board).unwrap();
}

#[test]
fn replica_converges_to_primary() {
    let primary = Db::open_in_memory(DbOptions::default()).unwrap();
    let target = Db::open_in_memory(DbOptions::default()).unwrap();
    populate(&primary);

    let replica = Replica::new("r1", &primary, &target, ReplicaMode::Sync).unwrap();
    let mut pulls = 0;
    loop {
        let stats = replica.pull(3).unwrap();
        if stats.applied + stats.skipped == 0 {
            break;
        }
        pulls += 1;
    }
    assert!(pulls > 1);
    assert_eq!(replica.position().unwrap(), primary.binlogs().last_seq());
    assert_eq!(data_entries(&target), data_entries(&primary));
    assert_eq!(target.zscan(b"scores", None, None, 10).count(), 2);
    assert_eq!(target.qsize(b"jobs").unwrap().into_option(), Some(2));
}

#[test]
fn position_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Db::open_in_memory(DbOptions::default()).unwrap();
    primary.set(b"a", b"1").unwrap();
    primary.set(b"b", b"2").unwrap();
    {
        let target = Db::open(dir.path(), DbOptions::default()).unwrap();
        let replica = Replica::new("r1", &primary, &target, ReplicaMode::Sync).unwrap();
        assert_eq!(replica.pull(1).unwrap().last_seq, 1);
    }
    let target = Db::open(dir.path(), DbOptions::default()).unwrap();
    let replica = Replica::new("r1", &primary, &target, ReplicaMode::Sync).unwrap();
    assert_eq!(replica.position().unwrap(), 1);
    let stats = replica.pull(10).unwrap();
    assert_eq!((stats.applied, stats.last_seq), (1, 2));
    assert!(target.get(b"b").unwrap().is_done());

    let other = Replica::new("r2", &primary, &target, ReplicaMode::Sync).unwrap();
    assert_eq!(other.position().unwrap(), 0);
}

#[test]
fn mirror_peers_do_not_echo() {
    let a = Db::open_in_memory(DbOptions::default()).unwrap();
    let b = Db::open_in_memory(DbOptions::default()).unwrap();
    a.set(b"from_a", b"1").unwrap();
    b.set(b"from_b", b"2").unwrap();

    let a_to_b = Replica::new("a", &a, &b, ReplicaMode::Mirror).unwrap();
    let b_to_a = Replica::new("b", &b, &a, ReplicaMode::Mirror).unwrap();
    assert_eq!(a_to_b.pull(10).unwrap().applied, 1);
    let back = b_to_a.pull(10).unwrap();
    assert_eq!((back.applied, back.skipped), (1, 1));
    assert_eq!(a_to_b.pull(10).unwrap().applied, 0);
    assert!(a.get(b"from_b").unwrap().is_done());
    assert!(b.get(b"from_a").unwrap().is_done());
}
