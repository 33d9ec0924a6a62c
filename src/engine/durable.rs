use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::memory::{MemCursor, MemEngine};
use super::{
    BatchOp, EngineCursor, EngineError, EngineResult, StorageEngine, SyncMode, WriteBatch,
    PROP_STATS,
};
use crate::primitives::bytes::buf::Cursor;
use crate::types::{record_crc32, RecordCrc};

const LOG_FILE: &str = "engine.log";
const COMPACT_FILE: &str = "engine.log.compact";
const LOG_MAGIC: [u8; 4] = *b"TKVL";
const LOG_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 8;
const FRAME_HEADER_LEN: usize = 8;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

fn file_header() -> [u8; FILE_HEADER_LEN] {
    let mut buf = [0u8; FILE_HEADER_LEN];
    buf[0..4].copy_from_slice(&LOG_MAGIC);
    buf[4..6].copy_from_slice(&LOG_FORMAT_VERSION.to_be_bytes());
    buf
}

/// Frame layout:
///
/// ```text
/// | crc32 (4B) | payload len (4B) | op count (4B) | ops ... |
/// op: | kind (1B) | key len (4B) | key | [value len (4B) | value] |
/// ```
///
/// The CRC covers the length field and the payload.
fn encode_frame<'a>(ops: impl ExactSizeIterator<Item = (&'a [u8], Option<&'a [u8]>)>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(ops.len() as u32).to_be_bytes());
    for (key, value) in ops {
        payload.push(if value.is_some() { OP_PUT } else { OP_DELETE });
        payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
        payload.extend_from_slice(key);
        if let Some(value) = value {
            payload.extend_from_slice(&(value.len() as u32).to_be_bytes());
            payload.extend_from_slice(value);
        }
    }
    let len = (payload.len() as u32).to_be_bytes();
    let crc = record_crc32(&[&len, &payload]);
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&len);
    frame.extend_from_slice(&payload);
    frame
}

fn batch_frame(batch: &WriteBatch) -> Vec<u8> {
    encode_frame(batch.ops().iter().map(|op| match op {
        BatchOp::Put { key, value } => (key.as_slice(), Some(value.as_slice())),
        BatchOp::Delete { key } => (key.as_slice(), None),
    }))
}

/// Decodes the frame at the start of `src`, returning the batch and the
/// frame's total length. `None` means a torn or corrupt frame.
fn decode_frame(src: &[u8]) -> Option<(WriteBatch, usize)> {
    let mut cur = Cursor::new(src);
    let stored_crc = cur.u32_be().ok()?;
    let len_bytes = cur.take(4).ok()?;
    let len = u32::from_be_bytes(len_bytes.try_into().ok()?) as usize;
    let payload = cur.take(len).ok()?;
    if !RecordCrc::new().field(len_bytes).field(payload).matches(stored_crc) {
        return None;
    }
    let mut body = Cursor::new(payload);
    let count = body.u32_be().ok()?;
    let mut batch = WriteBatch::new();
    for _ in 0..count {
        let kind = body.u8().ok()?;
        let key_len = body.u32_be().ok()? as usize;
        let key = body.take(key_len).ok()?;
        match kind {
            OP_PUT => {
                let val_len = body.u32_be().ok()? as usize;
                batch.put(key, body.take(val_len).ok()?);
            }
            OP_DELETE => batch.delete(key),
            _ => return None,
        }
    }
    Some((batch, FRAME_HEADER_LEN + len))
}

struct LogWriter {
    out: BufWriter<File>,
    offset: u64,
    frames: u64,
}

impl LogWriter {
    fn open(path: &Path, offset: u64) -> EngineResult<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            offset,
            frames: 0,
        })
    }

    fn append(&mut self, frame: &[u8], sync: SyncMode) -> EngineResult<()> {
        let res = self.out.write_all(frame).and_then(|_| match sync {
            SyncMode::Full => {
                self.out.flush()?;
                self.out.get_ref().sync_data()
            }
            SyncMode::Normal => self.out.flush(),
            SyncMode::Off => Ok(()),
        });
        if let Err(err) = res {
            // Drop whatever reached the file so the next frame starts clean.
            let _ = self.out.get_ref().set_len(self.offset);
            return Err(err.into());
        }
        self.offset += frame.len() as u64;
        self.frames += 1;
        Ok(())
    }
}

/// [`MemEngine`] made durable by an append-only log of batch frames.
///
/// Each [`StorageEngine::write`] appends one CRC-protected frame before the
/// batch reaches memory, so a batch is recovered whole or not at all. On
/// open the log is replayed until the first torn or corrupt frame, and the
/// file is cut back to the last good frame. [`StorageEngine::compact_range`]
/// rewrites the log as a single snapshot frame.
pub struct LogEngine {
    dir: PathBuf,
    mem: MemEngine,
    writer: Mutex<LogWriter>,
    sync: SyncMode,
}

impl LogEngine {
    /// Opens or creates the engine stored in `dir`.
    pub fn open(dir: impl AsRef<Path>, sync: SyncMode) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOG_FILE);
        let mem = MemEngine::new();
        let offset = if path.exists() {
            replay(&path, &mem)?
        } else {
            let mut file = File::create(&path)?;
            file.write_all(&file_header())?;
            file.sync_all()?;
            FILE_HEADER_LEN as u64
        };
        let writer = LogWriter::open(&path, offset)?;
        info!(dir = %dir.display(), entries = mem.len(), "engine.log.open");
        Ok(Self {
            dir,
            mem,
            writer: Mutex::new(writer),
            sync,
        })
    }

    /// Makes every subsequent write fail until switched off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.mem.set_fail_writes(fail);
    }

    /// Directory holding the log.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Forces buffered frames to stable storage.
    pub fn sync(&self) -> EngineResult<()> {
        let mut writer = self.writer.lock();
        writer.out.flush()?;
        writer.out.get_ref().sync_data()?;
        Ok(())
    }
}

fn replay(path: &Path, mem: &MemEngine) -> EngineResult<u64> {
    let data = fs::read(path)?;
    if data.len() < FILE_HEADER_LEN || data[..FILE_HEADER_LEN] != file_header() {
        return Err(EngineError::Corruption(format!(
            "{} has no valid log header",
            path.display()
        )));
    }
    let mut offset = FILE_HEADER_LEN;
    let mut frames = 0u64;
    while offset < data.len() {
        match decode_frame(&data[offset..]) {
            Some((batch, len)) => {
                mem.apply_batch(batch);
                offset += len;
                frames += 1;
            }
            None => {
                warn!(
                    path = %path.display(),
                    offset,
                    discarded = data.len() - offset,
                    "engine.log.torn_tail"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(offset as u64)?;
                file.sync_all()?;
                break;
            }
        }
    }
    debug!(path = %path.display(), frames, "engine.log.replay");
    Ok(offset as u64)
}

impl StorageEngine for LogEngine {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Bytes>> {
        self.mem.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    fn delete(&self, key: &[u8]) -> EngineResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    fn write(&self, batch: WriteBatch) -> EngineResult<()> {
        self.mem.check_writable()?;
        if batch.is_empty() {
            return Ok(());
        }
        let frame = batch_frame(&batch);
        let mut writer = self.writer.lock();
        writer.append(&frame, self.sync)?;
        // Applied while the writer lock is held so memory order matches log order.
        self.mem.apply_batch(batch);
        Ok(())
    }

    fn cursor(&self) -> Box<dyn EngineCursor + '_> {
        Box::new(MemCursor::new(&self.mem))
    }

    fn property(&self, name: &str) -> Option<String> {
        let base = self.mem.property(name)?;
        if name != PROP_STATS {
            return Some(base);
        }
        let writer = self.writer.lock();
        Some(format!(
            "{base}\nlog_bytes: {}\nlog_frames_since_open: {}",
            writer.offset, writer.frames
        ))
    }

    fn compact_range(&self, _start: Option<&[u8]>, _end: Option<&[u8]>) -> EngineResult<()> {
        let mut writer = self.writer.lock();
        writer.out.flush()?;
        let snapshot = self.mem.snapshot();
        let frame = encode_frame(
            snapshot
                .iter()
                .map(|(k, v)| (k.as_slice(), Some(v.as_ref()))),
        );
        let tmp = self.dir.join(COMPACT_FILE);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&file_header())?;
            if !snapshot.is_empty() {
                file.write_all(&frame)?;
            }
            file.sync_all()?;
        }
        let path = self.dir.join(LOG_FILE);
        fs::rename(&tmp, &path)?;
        let offset = fs::metadata(&path)?.len();
        let before = writer.offset;
        *writer = LogWriter::open(&path, offset)?;
        info!(
            dir = %self.dir.display(),
            before_bytes = before,
            after_bytes = offset,
            "engine.log.compacted"
        );
        Ok(())
    }
}

impl Drop for LogEngine {
    fn drop(&mut self) {
        if let Err(err) = self.writer.get_mut().out.flush() {
            warn!(error = %err, dir = %self.dir.display(), "engine.log.flush_on_drop");
        }
    }
}
