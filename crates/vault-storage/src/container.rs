//! Append-only binary container for dataset rows and attributes.
//!
//! # Layout
//!
//! ```text
//! +----------------+
//! | magic (8)      |  "DVAULT\0\x01"
//! +----------------+
//! | record         |  kind: u8 | len: u32 LE | payload (len bytes)
//! | record         |
//! | ...            |
//! +----------------+
//! ```
//!
//! Record kinds:
//!
//! - `Attr`: `u16 name length | name | JSON value`. The last record for a name wins.
//! - `Item`: same payload; appended to the named list (parameters, comments).
//! - `Rows`: `u32 row count | encoded rows` (see [`vault_core::record`]).
//!
//! The version tag is the `version` attribute, `[major, minor, patch]`.
//!
//! # Concurrent readers
//!
//! Existing complete records are never modified. A record only counts once all
//! `len` payload bytes are on disk, so a reader racing a writer sees either the
//! whole record or none of it. The in-memory index is refreshed incrementally
//! from the last scanned offset whenever the container is read.
//!
//! A failed append is cut back off the file. A torn tail left behind by a crash
//! is cut off before the next append, so new records never land behind it.

use crate::managed_file::{append_all, read_exact_at as read_at, ManagedFile};
use bytes::{BufMut, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use vault_core::{VaultError, VaultResult};

/// Magic number at the start of every container.
const MAGIC: &[u8; 8] = b"DVAULT\x00\x01";

/// kind (1) + length (4)
const FRAME_HEADER: u64 = 5;

const KIND_ATTR: u8 = 1;
const KIND_ITEM: u8 = 2;
const KIND_ROWS: u8 = 3;

/// Attribute holding the `[major, minor, patch]` format version.
pub const VERSION_ATTR: &str = "version";

#[derive(Debug, Clone, Copy)]
struct RowChunk {
    payload_offset: u64,
    payload_len: u64,
    first_row: u64,
    count: u64,
}

#[derive(Debug, Default)]
struct Index {
    scanned_to: u64,
    attrs: BTreeMap<String, serde_json::Value>,
    items: BTreeMap<String, Vec<serde_json::Value>>,
    chunks: Vec<RowChunk>,
    rows: u64,
}

pub struct Container {
    file: ManagedFile,
    index: Mutex<Index>,
}

fn handle_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).append(true);
    options
}

impl Container {
    /// Create a new, empty container. Fails if the file exists.
    pub fn create(path: &Path, timeout: Duration) -> VaultResult<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(MAGIC)?;
        file.sync_all()?;
        drop(file);
        Self::open(path, timeout)
    }

    pub fn open(path: &Path, timeout: Duration) -> VaultResult<Self> {
        let container = Self {
            file: ManagedFile::new(path, handle_options(), timeout),
            index: Mutex::new(Index::default()),
        };
        container.file.on_close(|file| file.sync_data());

        let file = container.file.acquire()?;
        let mut magic = [0u8; 8];
        if file.metadata()?.len() < MAGIC.len() as u64 {
            return Err(VaultError::corrupt(path, "file shorter than header"));
        }
        read_at(&file, 0, &mut magic)?;
        if &magic != MAGIC {
            return Err(VaultError::corrupt(path, "bad magic number"));
        }
        container.index.lock().scanned_to = MAGIC.len() as u64;
        drop(file);
        container.refresh()?;
        Ok(container)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file(&self) -> &ManagedFile {
        &self.file
    }

    fn corrupt(&self, reason: impl Into<String>) -> VaultError {
        VaultError::corrupt(self.file.path(), reason)
    }

    /// Index any complete records appended since the last scan.
    fn refresh(&self) -> VaultResult<MutexGuard<'_, Index>> {
        let mut index = self.index.lock();
        self.scan(&mut index)?;
        Ok(index)
    }

    fn scan(&self, index: &mut Index) -> VaultResult<()> {
        let file = self.file.acquire()?;
        let size = file.metadata()?.len();
        let mut offset = index.scanned_to;

        while offset + FRAME_HEADER <= size {
            let mut header = [0u8; FRAME_HEADER as usize];
            read_at(&file, offset, &mut header)?;
            let kind = header[0];
            let len = u64::from(u32::from_le_bytes([header[1], header[2], header[3], header[4]]));
            let payload_offset = offset + FRAME_HEADER;
            if payload_offset + len > size {
                // write in progress
                break;
            }

            match kind {
                KIND_ATTR | KIND_ITEM => {
                    let mut payload = vec![0u8; len as usize];
                    read_at(&file, payload_offset, &mut payload)?;
                    let (name, value) = self.decode_named(&payload)?;
                    if kind == KIND_ATTR {
                        index.attrs.insert(name, value);
                    } else {
                        index.items.entry(name).or_default().push(value);
                    }
                }
                KIND_ROWS => {
                    if len < 4 {
                        return Err(self.corrupt(format!("row record at {} too short", offset)));
                    }
                    let mut count = [0u8; 4];
                    read_at(&file, payload_offset, &mut count)?;
                    let count = u64::from(u32::from_le_bytes(count));
                    index.chunks.push(RowChunk {
                        payload_offset: payload_offset + 4,
                        payload_len: len - 4,
                        first_row: index.rows,
                        count,
                    });
                    index.rows += count;
                }
                other => {
                    return Err(self.corrupt(format!("unknown record kind {} at {}", other, offset)));
                }
            }
            offset = payload_offset + len;
        }

        index.scanned_to = offset;
        Ok(())
    }

    fn decode_named(&self, payload: &[u8]) -> VaultResult<(String, serde_json::Value)> {
        if payload.len() < 2 {
            return Err(self.corrupt("named record too short"));
        }
        let name_len = usize::from(u16::from_le_bytes([payload[0], payload[1]]));
        if payload.len() < 2 + name_len {
            return Err(self.corrupt("named record truncated"));
        }
        let name = std::str::from_utf8(&payload[2..2 + name_len])
            .map_err(|_| self.corrupt("record name is not UTF-8"))?
            .to_string();
        let value = serde_json::from_slice(&payload[2 + name_len..])
            .map_err(|e| self.corrupt(format!("attribute '{}': {}", name, e)))?;
        Ok((name, value))
    }

    fn put_frame(frames: &mut BytesMut, kind: u8, payload: &[u8]) -> VaultResult<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| VaultError::Unsupported(format!("record of {} bytes", payload.len())))?;
        frames.reserve(payload.len() + FRAME_HEADER as usize);
        frames.put_u8(kind);
        frames.put_u32_le(len);
        frames.put_slice(payload);
        Ok(())
    }

    fn put_named(
        frames: &mut BytesMut,
        kind: u8,
        name: &str,
        value: &impl Serialize,
    ) -> VaultResult<()> {
        let name_len = u16::try_from(name.len())
            .map_err(|_| VaultError::Unsupported(format!("record name '{}' too long", name)))?;
        let mut payload = BytesMut::new();
        payload.put_u16_le(name_len);
        payload.put_slice(name.as_bytes());
        payload.put_slice(&serde_json::to_vec(value)?);
        Self::put_frame(frames, kind, &payload)
    }

    /// Append encoded frames in one write. Either all of them land or none.
    fn write_frames(&self, frames: &[u8]) -> VaultResult<()> {
        let mut index = self.index.lock();
        self.scan(&mut index)?;
        let file = self.file.acquire()?;
        let size = file.metadata()?.len();
        if size > index.scanned_to {
            tracing::warn!(
                path = %self.file.path().display(),
                torn_bytes = size - index.scanned_to,
                "discarding incomplete trailing record"
            );
            file.set_len(index.scanned_to)?;
        }
        append_all(&file, frames)?;
        self.scan(&mut index)
    }

    pub fn set_attr(&self, name: &str, value: &impl Serialize) -> VaultResult<()> {
        let mut frames = BytesMut::new();
        Self::put_named(&mut frames, KIND_ATTR, name, value)?;
        self.write_frames(&frames)
    }

    pub fn attr<T: DeserializeOwned>(&self, name: &str) -> VaultResult<Option<T>> {
        let value = self.refresh()?.attrs.get(name).cloned();
        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Like [`Container::attr`] but a missing attribute is corruption.
    pub fn require_attr<T: DeserializeOwned>(&self, name: &str) -> VaultResult<T> {
        self.attr(name)?
            .ok_or_else(|| self.corrupt(format!("missing attribute '{}'", name)))
    }

    pub fn push_item(&self, list: &str, value: &impl Serialize) -> VaultResult<()> {
        self.push_items(list, std::slice::from_ref(value))
    }

    /// Append several items to `list` atomically.
    pub fn push_items<T: Serialize>(&self, list: &str, values: &[T]) -> VaultResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut frames = BytesMut::new();
        for value in values {
            Self::put_named(&mut frames, KIND_ITEM, list, value)?;
        }
        self.write_frames(&frames)
    }

    pub fn items<T: DeserializeOwned>(&self, list: &str) -> VaultResult<Vec<T>> {
        let values = self.refresh()?.items.get(list).cloned().unwrap_or_default();
        values
            .into_iter()
            .map(|v| Ok(serde_json::from_value(v)?))
            .collect()
    }

    pub fn version(&self) -> VaultResult<[u32; 3]> {
        self.require_attr(VERSION_ATTR)
    }

    /// Append `count` already-encoded rows as one record.
    pub fn append_rows(&self, count: usize, encoded: &[u8]) -> VaultResult<()> {
        let count = u32::try_from(count)
            .map_err(|_| VaultError::Unsupported(format!("{} rows in one write", count)))?;
        let mut payload = BytesMut::with_capacity(encoded.len() + 4);
        payload.put_u32_le(count);
        payload.put_slice(encoded);
        let mut frames = BytesMut::new();
        Self::put_frame(&mut frames, KIND_ROWS, &payload)?;
        self.write_frames(&frames)
    }

    pub fn row_count(&self) -> VaultResult<u64> {
        Ok(self.refresh()?.rows)
    }

    /// Encoded row chunks overlapping `[start, end)`, as `(first_row, count, bytes)`.
    pub fn read_row_chunks(&self, start: u64, end: u64) -> VaultResult<Vec<(u64, u64, Vec<u8>)>> {
        let chunks: Vec<RowChunk> = {
            let index = self.refresh()?;
            let first = index
                .chunks
                .partition_point(|c| c.first_row + c.count <= start);
            index.chunks[first..]
                .iter()
                .take_while(|c| c.first_row < end)
                .copied()
                .collect()
        };

        let file = self.file.acquire()?;
        chunks
            .into_iter()
            .map(|chunk| {
                let mut bytes = vec![0u8; chunk.payload_len as usize];
                read_at(&file, chunk.payload_offset, &mut bytes)?;
                Ok((chunk.first_row, chunk.count, bytes))
            })
            .collect()
    }
}
