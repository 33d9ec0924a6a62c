#![forbid(unsafe_code)]
//! Typed keys mapped onto the single ordered keyspace.
//!
//! Every stored key starts with a one-byte [`DataType`] tag. Collection
//! names that are followed by a sub-key are written in an escaped,
//! terminated form so that byte order over encoded keys equals the
//! lexicographic order of `(name, sub-key)`:
//!
//! ```text
//! KV      tag | name
//! HSIZE   tag | name
//! ZSIZE   tag | name
//! QSIZE   tag | name
//! HASH    tag | esc(name) | field
//! ZSET    tag | esc(name) | member
//! ZSCORE  tag | esc(name) | score (i64, order-preserving BE) | member
//! QUEUE   tag | esc(name) | seq (u64 BE)
//! SYNCLOG 0x01 | seq (u64 BE)
//! ```
//!
//! `esc(name)` doubles every `0x00` as `0x00 0xff` and ends with
//! `0x00 0x01`. Raising that final `0x01` to `0x02` gives a key above every
//! sub-key of the name and below every other name, which bounds "scan to
//! end of collection" queries whatever bytes the sub-keys start with.

use std::fmt;

use crate::primitives::bytes::buf::Cursor;
use crate::primitives::bytes::ord;
use crate::types::{KvError, Result};

/// Tag of binlog records. Sorts below every data tag.
pub const SYNCLOG: u8 = 1;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xff;
const TERMINATOR: u8 = 0x01;
const PAST_TERMINATOR: u8 = 0x02;

/// Logical data type stored in the keyspace.
///
/// Variants are declared in tag-byte order, so the derived `Ord` is the
/// order in which the regions appear in the keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DataType {
    /// Hash field count.
    HSize = b'H',
    /// Queue length.
    QSize = b'Q',
    /// Sorted set member count.
    ZSize = b'Z',
    /// Hash field.
    Hash = b'h',
    /// Flat key/value.
    Kv = b'k',
    /// Queue element.
    Queue = b'q',
    /// Sorted set member to score.
    ZSet = b's',
    /// Sorted set score index.
    ZScore = b'z',
}

impl DataType {
    /// Every tag in keyspace order.
    pub const ALL: [DataType; 8] = [
        DataType::HSize,
        DataType::QSize,
        DataType::ZSize,
        DataType::Hash,
        DataType::Kv,
        DataType::Queue,
        DataType::ZSet,
        DataType::ZScore,
    ];

    /// Lowest tag of the contiguous collection region.
    pub const MIN_PREFIX: DataType = DataType::Hash;
    /// Highest tag of the contiguous collection region.
    pub const MAX_PREFIX: DataType = DataType::ZSet;

    /// Tag byte written at the start of every key of this type.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Maps a tag byte back to its type.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Whether keys of this type carry a sub-key after the name.
    pub const fn has_subkey(self) -> bool {
        matches!(
            self,
            DataType::Hash | DataType::ZSet | DataType::ZScore | DataType::Queue
        )
    }

    /// Short lowercase label for logs and reports.
    pub const fn label(self) -> &'static str {
        match self {
            DataType::HSize => "hsize",
            DataType::QSize => "qsize",
            DataType::ZSize => "zsize",
            DataType::Hash => "hash",
            DataType::Kv => "kv",
            DataType::Queue => "queue",
            DataType::ZSet => "zset",
            DataType::ZScore => "zscore",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn push_escaped(dst: &mut Vec<u8>, name: &[u8]) {
    for &b in name {
        dst.push(b);
        if b == ESCAPE {
            dst.push(ESCAPED_ZERO);
        }
    }
    dst.push(ESCAPE);
    dst.push(TERMINATOR);
}

fn read_escaped(cur: &mut Cursor<'_>) -> Result<Vec<u8>> {
    let mut name = Vec::new();
    loop {
        match cur.u8()? {
            ESCAPE => match cur.u8()? {
                ESCAPED_ZERO => name.push(ESCAPE),
                TERMINATOR => return Ok(name),
                other => {
                    return Err(KvError::decode(format!(
                        "invalid escape byte {other:#04x} in name"
                    )))
                }
            },
            b => name.push(b),
        }
    }
}

fn open(raw: &[u8], ty: DataType) -> Result<Cursor<'_>> {
    let mut cur = Cursor::new(raw);
    let tag = cur
        .u8()
        .map_err(|_| KvError::decode(format!("empty {ty} key")))?;
    if tag != ty.tag() {
        return Err(KvError::decode(format!(
            "expected {ty} tag {:#04x}, found {tag:#04x}",
            ty.tag()
        )));
    }
    Ok(cur)
}

fn plain(ty: DataType, name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + name.len());
    buf.push(ty.tag());
    buf.extend_from_slice(name);
    buf
}

/// Prefix shared by every sub-key of the collection `name`.
pub fn collection_prefix(ty: DataType, name: &[u8]) -> Vec<u8> {
    debug_assert!(ty.has_subkey(), "{ty} has no sub-keys");
    let mut buf = Vec::with_capacity(name.len() + 3);
    buf.push(ty.tag());
    push_escaped(&mut buf, name);
    buf
}

/// Smallest key above every sub-key of the collection `name`.
///
/// It is not itself a valid key: the name ends in `0x00 0x02`, which no
/// escaped name contains.
pub fn collection_end(ty: DataType, name: &[u8]) -> Vec<u8> {
    let mut buf = collection_prefix(ty, name);
    if let Some(last) = buf.last_mut() {
        *last = PAST_TERMINATOR;
    }
    buf
}

/// Smallest key above every key tagged `ty`.
pub fn tag_end(ty: DataType) -> Vec<u8> {
    vec![ty.tag() + 1]
}

/// `k | name`
pub fn encode_kv(name: &[u8]) -> Vec<u8> {
    plain(DataType::Kv, name)
}

/// Inverse of [`encode_kv`].
pub fn decode_kv(raw: &[u8]) -> Result<Vec<u8>> {
    Ok(open(raw, DataType::Kv)?.rest().to_vec())
}

/// `H | name`
pub fn encode_hsize(name: &[u8]) -> Vec<u8> {
    plain(DataType::HSize, name)
}

/// Inverse of [`encode_hsize`].
pub fn decode_hsize(raw: &[u8]) -> Result<Vec<u8>> {
    Ok(open(raw, DataType::HSize)?.rest().to_vec())
}

/// `Z | name`
pub fn encode_zsize(name: &[u8]) -> Vec<u8> {
    plain(DataType::ZSize, name)
}

/// Inverse of [`encode_zsize`].
pub fn decode_zsize(raw: &[u8]) -> Result<Vec<u8>> {
    Ok(open(raw, DataType::ZSize)?.rest().to_vec())
}

/// `Q | name`
pub fn encode_qsize(name: &[u8]) -> Vec<u8> {
    plain(DataType::QSize, name)
}

/// Inverse of [`encode_qsize`].
pub fn decode_qsize(raw: &[u8]) -> Result<Vec<u8>> {
    Ok(open(raw, DataType::QSize)?.rest().to_vec())
}

/// `h | esc(name) | field`
pub fn encode_hash(name: &[u8], field: &[u8]) -> Vec<u8> {
    let mut buf = collection_prefix(DataType::Hash, name);
    buf.extend_from_slice(field);
    buf
}

/// Inverse of [`encode_hash`], returning `(name, field)`.
pub fn decode_hash(raw: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut cur = open(raw, DataType::Hash)?;
    let name = read_escaped(&mut cur)?;
    Ok((name, cur.rest().to_vec()))
}

/// `s | esc(name) | member`
pub fn encode_zset(name: &[u8], member: &[u8]) -> Vec<u8> {
    let mut buf = collection_prefix(DataType::ZSet, name);
    buf.extend_from_slice(member);
    buf
}

/// Inverse of [`encode_zset`], returning `(name, member)`.
pub fn decode_zset(raw: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut cur = open(raw, DataType::ZSet)?;
    let name = read_escaped(&mut cur)?;
    Ok((name, cur.rest().to_vec()))
}

/// `z | esc(name) | score | member`
pub fn encode_zscore(name: &[u8], score: i64, member: &[u8]) -> Vec<u8> {
    let mut buf = collection_prefix(DataType::ZScore, name);
    buf.reserve(8 + member.len());
    ord::push_i64_be(&mut buf, score);
    buf.extend_from_slice(member);
    buf
}

/// Inverse of [`encode_zscore`], returning `(name, score, member)`.
pub fn decode_zscore(raw: &[u8]) -> Result<(Vec<u8>, i64, Vec<u8>)> {
    let mut cur = open(raw, DataType::ZScore)?;
    let name = read_escaped(&mut cur)?;
    let score = cur.i64_be()?;
    Ok((name, score, cur.rest().to_vec()))
}

/// `q | esc(name) | seq`
pub fn encode_queue(name: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = collection_prefix(DataType::Queue, name);
    ord::push_u64_be(&mut buf, seq);
    buf
}

/// Inverse of [`encode_queue`], returning `(name, seq)`.
pub fn decode_queue(raw: &[u8]) -> Result<(Vec<u8>, u64)> {
    let mut cur = open(raw, DataType::Queue)?;
    let name = read_escaped(&mut cur)?;
    if cur.remaining() != 8 {
        return Err(KvError::decode(format!(
            "queue sequence needs 8 bytes, {} remaining",
            cur.remaining()
        )));
    }
    let seq = cur.u64_be()?;
    Ok((name, seq))
}

/// `0x01 | seq`
pub fn encode_synclog(seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    buf.push(SYNCLOG);
    ord::push_u64_be(&mut buf, seq);
    buf
}

/// Inverse of [`encode_synclog`].
pub fn decode_synclog(raw: &[u8]) -> Result<u64> {
    match raw.split_first() {
        Some((&SYNCLOG, rest)) if rest.len() == 8 => {
            ord::get_u64_be(rest).ok_or_else(|| KvError::decode("synclog seq"))
        }
        Some((&SYNCLOG, rest)) => Err(KvError::decode(format!(
            "synclog key needs 8 sequence bytes, found {}",
            rest.len()
        ))),
        _ => Err(KvError::decode("not a synclog key")),
    }
}

/// A decoded logical key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypedKey {
    /// Flat key/value.
    Kv {
        /// Key name.
        name: Vec<u8>,
    },
    /// Hash field.
    Hash {
        /// Hash name.
        name: Vec<u8>,
        /// Field within the hash.
        field: Vec<u8>,
    },
    /// Hash field count.
    HSize {
        /// Hash name.
        name: Vec<u8>,
    },
    /// Sorted set member.
    ZSet {
        /// Set name.
        name: Vec<u8>,
        /// Member.
        member: Vec<u8>,
    },
    /// Sorted set score index entry.
    ZScore {
        /// Set name.
        name: Vec<u8>,
        /// Score.
        score: i64,
        /// Member.
        member: Vec<u8>,
    },
    /// Sorted set member count.
    ZSize {
        /// Set name.
        name: Vec<u8>,
    },
    /// Queue element.
    Queue {
        /// Queue name.
        name: Vec<u8>,
        /// Element sequence.
        seq: u64,
    },
    /// Queue length.
    QSize {
        /// Queue name.
        name: Vec<u8>,
    },
}

impl TypedKey {
    /// Type of this key.
    pub fn data_type(&self) -> DataType {
        match self {
            TypedKey::Kv { .. } => DataType::Kv,
            TypedKey::Hash { .. } => DataType::Hash,
            TypedKey::HSize { .. } => DataType::HSize,
            TypedKey::ZSet { .. } => DataType::ZSet,
            TypedKey::ZScore { .. } => DataType::ZScore,
            TypedKey::ZSize { .. } => DataType::ZSize,
            TypedKey::Queue { .. } => DataType::Queue,
            TypedKey::QSize { .. } => DataType::QSize,
        }
    }

    /// Collection or key name.
    pub fn name(&self) -> &[u8] {
        match self {
            TypedKey::Kv { name }
            | TypedKey::Hash { name, .. }
            | TypedKey::HSize { name }
            | TypedKey::ZSet { name, .. }
            | TypedKey::ZScore { name, .. }
            | TypedKey::ZSize { name }
            | TypedKey::Queue { name, .. }
            | TypedKey::QSize { name } => name,
        }
    }

    /// Storage key bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TypedKey::Kv { name } => encode_kv(name),
            TypedKey::Hash { name, field } => encode_hash(name, field),
            TypedKey::HSize { name } => encode_hsize(name),
            TypedKey::ZSet { name, member } => encode_zset(name, member),
            TypedKey::ZScore {
                name,
                score,
                member,
            } => encode_zscore(name, *score, member),
            TypedKey::ZSize { name } => encode_zsize(name),
            TypedKey::Queue { name, seq } => encode_queue(name, *seq),
            TypedKey::QSize { name } => encode_qsize(name),
        }
    }

    /// Decodes any data key by its tag byte.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let Some(&tag) = raw.first() else {
            return Err(KvError::decode("empty key"));
        };
        let ty = DataType::from_tag(tag)
            .ok_or_else(|| KvError::decode(format!("unknown tag {tag:#04x}")))?;
        Ok(match ty {
            DataType::Kv => TypedKey::Kv {
                name: decode_kv(raw)?,
            },
            DataType::HSize => TypedKey::HSize {
                name: decode_hsize(raw)?,
            },
            DataType::ZSize => TypedKey::ZSize {
                name: decode_zsize(raw)?,
            },
            DataType::QSize => TypedKey::QSize {
                name: decode_qsize(raw)?,
            },
            DataType::Hash => {
                let (name, field) = decode_hash(raw)?;
                TypedKey::Hash { name, field }
            }
            DataType::ZSet => {
                let (name, member) = decode_zset(raw)?;
                TypedKey::ZSet { name, member }
            }
            DataType::ZScore => {
                let (name, score, member) = decode_zscore(raw)?;
                TypedKey::ZScore {
                    name,
                    score,
                    member,
                }
            }
            DataType::Queue => {
                let (name, seq) = decode_queue(raw)?;
                TypedKey::Queue { name, seq }
            }
        })
    }
}
