#![forbid(unsafe_code)]
//! CRC32 over the fields of engine frames and binlog records.

/// Running CRC32 (IEEE) over the fields of one stored record.
///
/// Fields are fed in order and hashed as if concatenated, so a record can
/// be checked without first copying its pieces into one buffer.
#[derive(Clone, Default)]
pub struct RecordCrc {
    inner: crc32fast::Hasher,
}

impl RecordCrc {
    /// Starts an empty checksum.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next field.
    pub fn field(mut self, bytes: &[u8]) -> Self {
        self.inner.update(bytes);
        self
    }

    /// Checksum of every field fed so far.
    pub fn value(&self) -> u32 {
        self.inner.clone().finalize()
    }

    /// Whether the fields fed so far hash to `stored`.
    pub fn matches(&self, stored: u32) -> bool {
        self.value() == stored
    }
}

/// CRC32 over several slices taken in order, as if concatenated.
pub fn record_crc32(parts: &[&[u8]]) -> u32 {
    parts
        .iter()
        .fold(RecordCrc::new(), |crc, part| crc.field(part))
        .value()
}
