//! tagkv: typed key-value layers over one ordered keyspace.
//!
//! Flat keys, hashes, sorted sets and queues share a single sorted byte
//! keyspace. Every stored key carries a one-byte type tag ([`keyspace`]),
//! scans stay inside their type and collection ([`iter`]), and every
//! mutation is committed in one atomic batch together with the binlog
//! records that describe it ([`binlog`]), which is what [`replication`]
//! consumes. Packed sorted-set blobs are merged by [`packed`].
//!
//! ```no_run
//! use tagkv::{Db, DbOptions, Outcome};
//!
//! # fn main() -> tagkv::Result<()> {
//! let db = Db::open("/tmp/tagkv", DbOptions::default())?;
//! db.set(b"greeting", b"hello")?;
//! if let Outcome::Done(value) = db.get(b"greeting")? {
//!     assert_eq!(&value[..], b"hello");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod binlog;
pub mod db;
pub mod engine;
pub mod iter;
pub mod keyspace;
pub mod packed;
pub mod primitives;
pub mod replication;
pub mod types;

pub use binlog::{Binlog, BinlogCommand, BinlogQueue, BinlogType, Transaction};
pub use db::metrics::{CounterMetrics, NoopMetrics, OpMetrics};
pub use db::{Config, ConfigError, Db, DbOptions, RegionRange, KEY_LEN_MAX};
pub use engine::{LogEngine, MemEngine, StorageEngine, SyncMode};
pub use iter::{HIterator, KIterator, NameIter, QIterator, ZIterator};
pub use keyspace::DataType;
pub use packed::{MergeStrategy, PackedRecord, SortOrder};
pub use replication::{PullStats, Replica, ReplicaMode};
pub use types::{status_code, KvError, OpResult, Outcome, Result};
