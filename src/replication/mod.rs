#![forbid(unsafe_code)]
//! Binlog consumer that copies a primary [`Db`] into a target [`Db`].
//!
//! A [`Replica`] keeps its position in the target's `meta` engine under
//! `repl.<id>.last_seq`. Set-like records are replayed by copying the
//! primary's current value at the record's key, delete-like records delete
//! the key, and marker records only move the position.

use tracing::{debug, info, warn};

use crate::binlog::{Binlog, BinlogCommand, BinlogType};
use crate::db::Db;
use crate::types::{KvError, Result};

/// How replayed writes are tagged in the target's own binlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaMode {
    /// Replayed writes are logged as [`BinlogType::Sync`].
    #[default]
    Sync,
    /// Replayed writes are logged as [`BinlogType::Mirror`]; records that
    /// are already mirrored are skipped so two peers do not echo each other.
    Mirror,
}

impl ReplicaMode {
    const fn log_type(self) -> BinlogType {
        match self {
            ReplicaMode::Sync => BinlogType::Sync,
            ReplicaMode::Mirror => BinlogType::Mirror,
        }
    }
}

/// Result of one [`Replica::pull`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStats {
    /// Records whose mutation was applied to the target.
    pub applied: u64,
    /// Records that only moved the position.
    pub skipped: u64,
    /// Position after the pull.
    pub last_seq: u64,
}

/// A target database following a primary's binlog.
pub struct Replica<'a> {
    id: String,
    primary: &'a Db,
    target: &'a Db,
    mode: ReplicaMode,
}

impl<'a> Replica<'a> {
    /// Attaches `target` to `primary`. The position is read from, and saved
    /// to, the target under `id`.
    pub fn new(
        id: impl Into<String>,
        primary: &'a Db,
        target: &'a Db,
        mode: ReplicaMode,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(KvError::EmptyKey);
        }
        Ok(Self {
            id,
            primary,
            target,
            mode,
        })
    }

    /// Replication mode.
    pub fn mode(&self) -> ReplicaMode {
        self.mode
    }

    fn position_key(&self) -> Vec<u8> {
        format!("repl.{}.last_seq", self.id).into_bytes()
    }

    /// Sequence of the last record replayed, 0 before the first pull.
    pub fn position(&self) -> Result<u64> {
        match self.target.meta().get(&self.position_key())? {
            Some(raw) => Ok(crate::db::parse_i64(&raw)?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// Moves the position without replaying anything.
    pub fn set_position(&self, seq: u64) -> Result<()> {
        self.target
            .meta()
            .put(&self.position_key(), seq.to_string().as_bytes())?;
        Ok(())
    }

    /// Replays up to `limit` records after the current position.
    pub fn pull(&self, limit: usize) -> Result<PullStats> {
        let mut stats = PullStats {
            last_seq: self.position()?,
            ..PullStats::default()
        };
        let min_seq = self.primary.binlogs().min_seq();
        if min_seq > stats.last_seq.saturating_add(1) {
            warn!(
                replica = %self.id,
                position = stats.last_seq,
                min_seq,
                "repl.gap"
            );
        }
        for record in self.primary.binlogs().read_from(stats.last_seq, limit)? {
            if self.apply(&record)? {
                stats.applied += 1;
            } else {
                stats.skipped += 1;
            }
            self.set_position(record.seq)?;
            stats.last_seq = record.seq;
        }
        if stats.applied + stats.skipped > 0 {
            info!(
                replica = %self.id,
                applied = stats.applied,
                skipped = stats.skipped,
                last_seq = stats.last_seq,
                "repl.pull"
            );
        }
        Ok(stats)
    }

    /// Applies one record; `false` when it carried no mutation to apply.
    fn apply(&self, record: &Binlog) -> Result<bool> {
        let cmd = record.cmd;
        let mirrored = self.mode == ReplicaMode::Mirror && record.ty == BinlogType::Mirror;
        if mirrored || record.ty == BinlogType::Noop || is_marker(cmd) {
            return Ok(false);
        }
        let value = if cmd.is_set() {
            self.primary.data().get(&record.key)?
        } else {
            None
        };
        let mut tx = self.target.binlogs().begin();
        match value {
            Some(value) => tx.put(record.key.clone(), value.as_ref()),
            None => tx.delete(record.key.clone()),
        }
        tx.add_log(self.mode.log_type(), cmd, record.key.clone());
        tx.commit()?;
        debug!(
            replica = %self.id,
            seq = record.seq,
            cmd = cmd.label(),
            "repl.apply"
        );
        Ok(true)
    }
}

/// Whether a command only frames other records.
pub fn is_marker(cmd: BinlogCommand) -> bool {
    matches!(
        cmd,
        BinlogCommand::None | BinlogCommand::Begin | BinlogCommand::End
    )
}
