//! Error, result and outcome types shared by every layer.

pub mod checksum;
mod outcome;

use thiserror::Error;

pub use checksum::{record_crc32, RecordCrc};
pub use outcome::{status_code, OpResult, Outcome};

use crate::db::ConfigError;
use crate::engine::EngineError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KvError>;

/// Errors surfaced by the keyspace, binlog and operation layers.
///
/// A missing key is not an error; operations report it as [`Outcome::NoOp`].
#[derive(Debug, Error)]
pub enum KvError {
    /// Malformed key or value bytes.
    #[error("decode error: {0}")]
    Decode(String),
    /// The storage engine rejected a read or write.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    /// A zero-length logical key was supplied where one is required.
    #[error("empty key")]
    EmptyKey,
    /// A key or collection name is longer than [`crate::db::KEY_LEN_MAX`].
    #[error("key too long: {len} bytes (max {max})")]
    KeyTooLong {
        /// Supplied length.
        len: usize,
        /// Largest accepted length.
        max: usize,
    },
    /// Argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl KvError {
    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        KvError::Decode(msg.into())
    }
}
