//! TOML configuration file for a [`super::Db`].
//!
//! ```toml
//! [engine]
//! sync = "normal"      # full | normal | off
//!
//! [binlog]
//! capacity = 10000000
//! enabled = true
//!
//! [zset]
//! merge = "linear"     # linear | hashed
//! ```
//!
//! Every section and key is optional.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::engine::SyncMode;
use crate::packed::MergeStrategy;

use super::options::DbOptions;

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {source}")]
    Parse {
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A value is outside its allowed set.
    #[error("config key '{key}' has invalid value '{value}'")]
    InvalidValue {
        /// Dotted key.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    engine: EngineSection,
    #[serde(default)]
    binlog: BinlogSection,
    #[serde(default)]
    zset: ZsetSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineSection {
    sync: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BinlogSection {
    capacity: Option<u64>,
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ZsetSection {
    merge: Option<String>,
}

/// Parsed configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `[engine] sync`
    pub sync_mode: SyncMode,
    /// `[binlog] capacity`
    pub binlog_capacity: u64,
    /// `[binlog] enabled`
    pub binlog_enabled: bool,
    /// `[zset] merge`
    pub merge_strategy: MergeStrategy,
}

impl Default for Config {
    fn default() -> Self {
        let options = DbOptions::default();
        Self {
            sync_mode: options.sync_mode,
            binlog_capacity: options.binlog_capacity,
            binlog_enabled: options.binlog_enabled,
            merge_strategy: options.merge_strategy,
        }
    }
}

impl Config {
    /// Reads and parses `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parses a TOML document.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { source })?;
        let defaults = Config::default();
        let sync_mode = match raw.engine.sync.as_deref() {
            Some(value) => parse_sync(value)?,
            None => defaults.sync_mode,
        };
        let merge_strategy = match raw.zset.merge.as_deref() {
            Some(value) => parse_merge(value)?,
            None => defaults.merge_strategy,
        };
        let binlog_capacity = raw.binlog.capacity.unwrap_or(defaults.binlog_capacity);
        if binlog_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "binlog.capacity",
                value: binlog_capacity.to_string(),
            });
        }
        Ok(Self {
            sync_mode,
            binlog_capacity,
            binlog_enabled: raw.binlog.enabled.unwrap_or(defaults.binlog_enabled),
            merge_strategy,
        })
    }

    /// Options for [`super::Db::open`], with the default metrics collector.
    pub fn into_options(self) -> DbOptions {
        DbOptions::new()
            .sync_mode(self.sync_mode)
            .binlog_capacity(self.binlog_capacity)
            .binlog_enabled(self.binlog_enabled)
            .merge_strategy(self.merge_strategy)
    }
}

fn parse_sync(value: &str) -> Result<SyncMode, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "full" => Ok(SyncMode::Full),
        "normal" => Ok(SyncMode::Normal),
        "off" => Ok(SyncMode::Off),
        _ => Err(ConfigError::InvalidValue {
            key: "engine.sync",
            value: value.to_string(),
        }),
    }
}

fn parse_merge(value: &str) -> Result<MergeStrategy, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "linear" => Ok(MergeStrategy::Linear),
        "hashed" => Ok(MergeStrategy::Hashed),
        _ => Err(ConfigError::InvalidValue {
            key: "zset.merge",
            value: value.to_string(),
        }),
    }
}
