//! Legacy text rows: one dataset row per line, 12 significant digits.
//!
//! Parsed rows are cached in memory so repeated paged reads of a large dataset
//! do not re-read the file. Only bytes appended since the last read are parsed.
//! The cache is dropped after its own idle timeout, which is independent of the
//! file-handle timeout: the cache holds rows and a byte offset, never the handle,
//! so the handle may close and reopen underneath it.
//!
//! A line without its newline is never parsed. Before an append, such a tail
//! left behind by a crash is cut off so the new rows start on a fresh line.

use super::{RowStore, StorageSettings};
use crate::idle::IdleTimer;
use crate::managed_file::{append_all, read_exact_at, ManagedFile};
use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use vault_core::{ColumnValue, Row, VaultError, VaultResult};

const SIGNIFICANT_DIGITS: i32 = 12;

/// Format like C's `%.12G`.
fn format_g12(v: f64) -> String {
    if v.is_nan() {
        return "NAN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if v == 0.0 {
        return "0".to_string();
    }

    let sci = format!("{:.*E}", (SIGNIFICANT_DIGITS - 1) as usize, v);
    let (mantissa, exp) = sci.split_once('E').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= SIGNIFICANT_DIGITS {
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}E{}{:02}", trim_zeros(mantissa), sign, exp.abs());
    }
    let decimals = (SIGNIFICANT_DIGITS - 1 - exp).max(0) as usize;
    trim_zeros(&format!("{:.*}", decimals, v)).to_string()
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

struct RowCache {
    rows: Vec<Row>,
    /// File offset up to which complete lines have been parsed.
    parsed_bytes: u64,
}

type SharedCache = Arc<Mutex<Option<RowCache>>>;

pub struct CsvRowStore {
    file: ManagedFile,
    width: usize,
    cache: SharedCache,
    eviction: IdleTimer,
}

fn handle_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).append(true);
    options
}

impl CsvRowStore {
    /// Create an empty data file. Fails if it already exists.
    pub fn create(path: &Path, width: usize, settings: &StorageSettings) -> VaultResult<Self> {
        OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Self::open(path, width, settings))
    }

    /// Attach to an existing data file. The file is not touched until first use.
    pub fn open(path: &Path, width: usize, settings: &StorageSettings) -> Self {
        let file = ManagedFile::new(path, handle_options(), settings.file_timeout);
        file.on_close(|f| f.sync_data());
        Self {
            file,
            width,
            cache: Arc::new(Mutex::new(None)),
            eviction: IdleTimer::new(settings.data_cache_timeout),
        }
    }

    fn check_row(&self, row: &Row) -> VaultResult<Vec<f64>> {
        if row.len() != self.width {
            return Err(VaultError::BadData {
                expected: self.width,
                got: row.len(),
            });
        }
        row.iter()
            .enumerate()
            .map(|(column, value)| {
                value.as_f64().ok_or_else(|| VaultError::TypeMismatch {
                    column,
                    expected: "'v'".to_string(),
                    got: value.kind().to_string(),
                })
            })
            .collect()
    }

    /// Parse any complete lines appended since the last read and restart the
    /// eviction timer.
    fn refresh(&self) -> VaultResult<MutexGuard<'_, Option<RowCache>>> {
        let mut guard = self.cache.lock();
        let cache = guard.get_or_insert_with(|| {
            tracing::debug!(path = %self.file.path().display(), "loading rows into cache");
            RowCache {
                rows: Vec::new(),
                parsed_bytes: 0,
            }
        });

        let file = self.file.acquire()?;
        let size = file.metadata()?.len();
        if size > cache.parsed_bytes {
            let mut fresh = vec![0u8; (size - cache.parsed_bytes) as usize];
            read_exact_at(&file, cache.parsed_bytes, &mut fresh)?;

            // A line without its newline is still being written.
            if let Some(end) = fresh.iter().rposition(|&b| b == b'\n') {
                let complete = &fresh[..=end];
                let rows = self.parse(complete, cache.rows.len())?;
                cache.rows.extend(rows);
                cache.parsed_bytes += complete.len() as u64;
            }
        }
        drop(file);

        let weak = Arc::downgrade(&self.cache);
        let path = self.file.path().to_path_buf();
        self.eviction.reset(move || {
            if let Some(cache) = weak.upgrade() {
                cache.lock().take();
                tracing::debug!(path = %path.display(), "evicted cached rows");
            }
        });
        Ok(guard)
    }

    /// Parse complete lines; `first_row` is only used in error messages.
    fn parse(&self, bytes: &[u8], first_row: usize) -> VaultResult<Vec<Row>> {
        let mut rows = Vec::new();
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(::csv::Trim::All)
            .from_reader(bytes);
        for record in reader.records() {
            let record = record.map_err(|e| VaultError::corrupt(self.file.path(), e.to_string()))?;
            if record.len() != self.width {
                return Err(VaultError::corrupt(
                    self.file.path(),
                    format!(
                        "row {} has {} values, expected {}",
                        first_row + rows.len(),
                        record.len(),
                        self.width
                    ),
                ));
            }
            let row = record
                .iter()
                .map(|field| {
                    field.parse::<f64>().map(ColumnValue::F64).map_err(|e| {
                        VaultError::corrupt(self.file.path(), format!("bad value '{}': {}", field, e))
                    })
                })
                .collect::<VaultResult<Row>>()?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Length of the file up to and including its last newline.
    fn complete_len(file: &File, size: u64) -> VaultResult<u64> {
        const BLOCK: u64 = 4096;
        let mut end = size;
        while end > 0 {
            let start = end.saturating_sub(BLOCK);
            let mut block = vec![0u8; (end - start) as usize];
            read_exact_at(file, start, &mut block)?;
            if let Some(pos) = block.iter().rposition(|&b| b == b'\n') {
                return Ok(start + pos as u64 + 1);
            }
            end = start;
        }
        Ok(0)
    }

    /// Whether parsed rows are currently held in memory.
    pub fn is_cached(&self) -> bool {
        self.cache.lock().is_some()
    }
}

impl RowStore for CsvRowStore {
    fn append(&mut self, rows: &[Row]) -> VaultResult<()> {
        let values = rows
            .iter()
            .map(|row| self.check_row(row))
            .collect::<VaultResult<Vec<_>>>()?;
        if values.is_empty() {
            return Ok(());
        }

        let mut writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for row in &values {
            writer
                .write_record(row.iter().map(|v| format_g12(*v)))
                .map_err(|e| VaultError::Encoding(e.to_string()))?;
        }
        let text = writer
            .into_inner()
            .map_err(|e| VaultError::Encoding(e.to_string()))?;

        let file = self.file.acquire()?;
        let size = file.metadata()?.len();
        let complete = Self::complete_len(&file, size)?;
        if complete < size {
            tracing::warn!(
                path = %self.file.path().display(),
                torn_bytes = size - complete,
                "discarding incomplete trailing line"
            );
            file.set_len(complete)?;
        }
        append_all(&file, &text)?;
        Ok(())
    }

    fn row_count(&self) -> VaultResult<u64> {
        let guard = self.refresh()?;
        Ok(guard.as_ref().map_or(0, |c| c.rows.len() as u64))
    }

    fn read(&self, start: u64, limit: Option<usize>) -> VaultResult<Vec<Row>> {
        let guard = self.refresh()?;
        let Some(cache) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        let total = cache.rows.len();
        let start = usize::try_from(start).unwrap_or(usize::MAX).min(total);
        let end = match limit {
            Some(limit) => start.saturating_add(limit).min(total),
            None => total,
        };
        Ok(cache.rows[start..end].to_vec())
    }
}
