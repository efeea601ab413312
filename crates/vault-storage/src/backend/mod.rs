//! Dataset backends.
//!
//! A [`Backend`] is one dataset on disk. It is assembled from two independent
//! capabilities: a [`RowStore`] that owns row encoding, and a
//! [`MetadataStore`] that owns everything else. The three on-disk formats are
//! fixed pairings of the two:
//!
//! | format | rows | metadata |
//! |--------|------|----------|
//! | [`Format::LegacyCsv`] (1.0.0) | [`CsvRowStore`] | [`SideFileMetadata`] |
//! | [`Format::Simple`] (2.0.0) | [`ContainerRowStore`], float64 only | [`ContainerMetadata`] |
//! | [`Format::Extended`] (3.0.0) | [`ContainerRowStore`], typed columns | [`ContainerMetadata`] |
//!
//! Which format a dataset uses is decided once, at creation. Opening reads the
//! persisted version tag and picks the matching reader; nothing is migrated.

mod binary;
mod csv;

pub use self::binary::{ContainerMetadata, ContainerRowStore};
pub use self::csv::CsvRowStore;

use crate::container::Container;
use crate::metadata::{Comment, DatasetMetadata, MetadataStore, Parameter, SideFileMetadata};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use vault_core::column::{columns, ColumnValue, Dependent, Independent, Row};
use vault_core::path::{decode_segment, encode_segment};
use vault_core::type_tag::{self, SIMPLE_ROW_TYPE};
use vault_core::{time, DataType, ParamValue, RecordLayout, VaultError, VaultResult};

const CSV_EXTENSION: &str = "csv";
const CONTAINER_EXTENSION: &str = "dvc";
const SIDE_FILE_EXTENSION: &str = "toml";

/// On-disk dataset format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// One text row per line plus a TOML side file. Scalar float64 columns only.
    #[serde(rename = "csv")]
    LegacyCsv,
    /// Binary container holding a fixed all-float64 record.
    Simple,
    /// Binary container with typed, optionally shaped columns.
    Extended,
}

impl Format {
    pub fn version(self) -> [u32; 3] {
        match self {
            Format::LegacyCsv => [1, 0, 0],
            Format::Simple => [2, 0, 0],
            Format::Extended => [3, 0, 0],
        }
    }

    /// Reader dispatch on a persisted version tag.
    pub fn from_version(version: [u32; 3]) -> VaultResult<Self> {
        match version[0] {
            0 => Err(VaultError::Unsupported(format!(
                "dataset version {}.{}.{}",
                version[0], version[1], version[2]
            ))),
            1 => Ok(Format::LegacyCsv),
            2 => Ok(Format::Simple),
            _ => Ok(Format::Extended),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::LegacyCsv => CSV_EXTENSION,
            Format::Simple | Format::Extended => CONTAINER_EXTENSION,
        }
    }

    /// Only typed datasets can be read column-wise.
    pub fn supports_transpose(self) -> bool {
        self == Format::Extended
    }

    fn requires_scalar_float(self) -> bool {
        self != Format::Extended
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::LegacyCsv => "csv",
            Format::Simple => "simple",
            Format::Extended => "extended",
        };
        f.write_str(name)
    }
}

impl FromStr for Format {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "legacy" => Ok(Format::LegacyCsv),
            "simple" => Ok(Format::Simple),
            "extended" => Ok(Format::Extended),
            other => Err(VaultError::Unsupported(format!("unknown dataset format '{}'", other))),
        }
    }
}

/// Timeouts shared by every backend opened from one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSettings {
    /// Idle time before a dataset file handle is closed.
    pub file_timeout: Duration,
    /// Idle time before a CSV dataset's parsed rows are dropped from memory.
    pub data_cache_timeout: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            file_timeout: Duration::from_secs(60),
            data_cache_timeout: Duration::from_secs(60),
        }
    }
}

/// Row encoding strategy.
pub trait RowStore: Send {
    /// Append all rows or none of them.
    fn append(&mut self, rows: &[Row]) -> VaultResult<()>;

    fn row_count(&self) -> VaultResult<u64>;

    /// Up to `limit` rows starting at row `start`; everything remaining when `limit` is `None`.
    fn read(&self, start: u64, limit: Option<usize>) -> VaultResult<Vec<Row>>;
}

/// Rows returned by [`Backend::get_data`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataBlock {
    Rows(Vec<Row>),
    /// One vector per column, in column order.
    Columns(Vec<Vec<ColumnValue>>),
}

impl DataBlock {
    /// Number of rows in the block.
    pub fn len(&self) -> usize {
        match self {
            DataBlock::Rows(rows) => rows.len(),
            DataBlock::Columns(cols) => cols.first().map_or(0, Vec::len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A page of data and the position to resume reading from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPage {
    pub data: DataBlock,
    pub next: u64,
}

fn file_stem(name: &str) -> String {
    encode_segment(name)
}

fn transpose(rows: Vec<Row>, width: usize) -> Vec<Vec<ColumnValue>> {
    let mut cols: Vec<Vec<ColumnValue>> = (0..width).map(|_| Vec::with_capacity(rows.len())).collect();
    for row in rows {
        for (col, value) in cols.iter_mut().zip(row) {
            col.push(value);
        }
    }
    cols
}

/// One dataset on disk.
pub struct Backend {
    name: String,
    format: Format,
    rows: Box<dyn RowStore>,
    store: Box<dyn MetadataStore>,
    meta: DatasetMetadata,
    timestamps_dirty: bool,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Create a new dataset named `name` inside `dir`.
    ///
    /// CSV and simple datasets only hold scalar float64 columns; anything else
    /// is rejected before a file is created.
    pub fn create(
        dir: &Path,
        name: &str,
        format: Format,
        title: &str,
        independents: Vec<Independent>,
        dependents: Vec<Dependent>,
        settings: &StorageSettings,
    ) -> VaultResult<Self> {
        if name.is_empty() {
            return Err(VaultError::EmptyName);
        }
        if Self::exists(dir, name) {
            return Err(VaultError::AlreadyExists {
                name: name.to_string(),
            });
        }
        if format.requires_scalar_float() {
            let cols = columns(&independents, &dependents);
            if let Some(col) = cols
                .iter()
                .find(|c| c.datatype != DataType::F64 || !c.shape.is_scalar())
            {
                return Err(VaultError::Unsupported(format!(
                    "{} datasets hold scalar float64 columns only; column '{}' is '{}'",
                    format,
                    col.label,
                    type_tag::column_tag(col, 0)
                )));
            }
        }

        let meta = DatasetMetadata::new(title, independents, dependents);
        let layout = RecordLayout::new(&meta.independents, &meta.dependents);
        let stem = file_stem(name);

        let (rows, mut store): (Box<dyn RowStore>, Box<dyn MetadataStore>) = match format {
            Format::LegacyCsv => {
                let data = dir.join(format!("{}.{}", stem, CSV_EXTENSION));
                let side = dir.join(format!("{}.{}", stem, SIDE_FILE_EXTENSION));
                (
                    Box::new(CsvRowStore::create(&data, layout.width(), settings)?),
                    Box::new(SideFileMetadata::new(side)),
                )
            }
            Format::Simple | Format::Extended => {
                let path = dir.join(format!("{}.{}", stem, CONTAINER_EXTENSION));
                let container = Arc::new(Container::create(&path, settings.file_timeout)?);
                container.set_attr(crate::container::VERSION_ATTR, &format.version())?;
                (
                    Box::new(ContainerRowStore::new(container.clone(), layout)),
                    Box::new(ContainerMetadata::new(container)),
                )
            }
        };
        store.initialize(&meta)?;

        tracing::info!(dataset = %name, %format, "created dataset");
        Ok(Self {
            name: name.to_string(),
            format,
            rows,
            store,
            meta,
            timestamps_dirty: false,
        })
    }

    /// Open an existing dataset, choosing the reader from its version tag.
    pub fn open(dir: &Path, name: &str, settings: &StorageSettings) -> VaultResult<Self> {
        let stem = file_stem(name);
        let container_path = dir.join(format!("{}.{}", stem, CONTAINER_EXTENSION));
        let csv_path = dir.join(format!("{}.{}", stem, CSV_EXTENSION));

        let (format, rows, store, meta): (Format, Box<dyn RowStore>, Box<dyn MetadataStore>, _) =
            if container_path.is_file() {
                let container = Arc::new(Container::open(&container_path, settings.file_timeout)?);
                let format = Format::from_version(container.version()?)?;
                if format == Format::LegacyCsv {
                    return Err(VaultError::corrupt(
                        &container_path,
                        "container carries a CSV version tag",
                    ));
                }
                let mut store = ContainerMetadata::new(container.clone());
                let meta = store.load()?;
                let layout = RecordLayout::new(&meta.independents, &meta.dependents);
                (
                    format,
                    Box::new(ContainerRowStore::new(container, layout)),
                    Box::new(store),
                    meta,
                )
            } else if csv_path.is_file() {
                let mut store =
                    SideFileMetadata::new(dir.join(format!("{}.{}", stem, SIDE_FILE_EXTENSION)));
                let meta = store.load()?;
                let width = meta.independents.len() + meta.dependents.len();
                (
                    Format::LegacyCsv,
                    Box::new(CsvRowStore::open(&csv_path, width, settings)),
                    Box::new(store),
                    meta,
                )
            } else {
                return Err(VaultError::DatasetNotFound {
                    name: name.to_string(),
                });
            };

        tracing::debug!(dataset = %name, %format, "opened dataset");
        Ok(Self {
            name: name.to_string(),
            format,
            rows,
            store,
            meta,
            timestamps_dirty: false,
        })
    }

    /// Whether a dataset named `name` has a data file in `dir`.
    pub fn exists(dir: &Path, name: &str) -> bool {
        let stem = file_stem(name);
        [CONTAINER_EXTENSION, CSV_EXTENSION]
            .iter()
            .any(|ext| dir.join(format!("{}.{}", stem, ext)).is_file())
    }

    /// Sorted names of all datasets in `dir`.
    pub fn list(dir: &Path) -> VaultResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path: PathBuf = entry?.path();
            if !path.is_file() {
                continue;
            }
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some(CSV_EXTENSION) | Some(CONTAINER_EXTENSION)) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_segment(stem) {
                Ok(name) => names.push(name),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable dataset file")
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn version(&self) -> [u32; 3] {
        self.format.version()
    }

    pub fn title(&self) -> &str {
        &self.meta.title
    }

    pub fn independents(&self) -> &[Independent] {
        &self.meta.independents
    }

    pub fn dependents(&self) -> &[Dependent] {
        &self.meta.dependents
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.meta
    }

    pub fn row_type(&self) -> String {
        match self.format {
            Format::LegacyCsv | Format::Simple => SIMPLE_ROW_TYPE.to_string(),
            Format::Extended => {
                type_tag::row_type(&columns(&self.meta.independents, &self.meta.dependents))
            }
        }
    }

    /// Column-wise type tag, or `None` when the format cannot transpose.
    pub fn transpose_type(&self) -> Option<String> {
        self.format.supports_transpose().then(|| {
            type_tag::transpose_type(&columns(&self.meta.independents, &self.meta.dependents))
        })
    }

    pub fn add_data(&mut self, rows: &[Row]) -> VaultResult<()> {
        self.rows.append(rows)?;
        self.meta.modified = time::now();
        self.timestamps_dirty = true;
        Ok(())
    }

    /// Read up to `limit` rows from `start`.
    ///
    /// `simple_only` demands that every column is scalar float64; `transpose`
    /// returns one vector per column and is only available for typed datasets.
    pub fn get_data(
        &self,
        limit: Option<usize>,
        start: u64,
        transpose_rows: bool,
        simple_only: bool,
    ) -> VaultResult<DataPage> {
        let cols = columns(&self.meta.independents, &self.meta.dependents);
        if simple_only {
            if let Some(col) = cols
                .iter()
                .find(|c| c.datatype != DataType::F64 || !c.shape.is_scalar())
            {
                return Err(VaultError::DataVersionMismatch {
                    column: col.label.to_string(),
                    datatype: type_tag::column_tag(col, 0),
                });
            }
        }
        if transpose_rows && !self.format.supports_transpose() {
            return Err(VaultError::Unsupported(format!(
                "transposed reads from {} datasets",
                self.format
            )));
        }

        let rows = self.rows.read(start, limit)?;
        let next = start + rows.len() as u64;
        let data = if transpose_rows {
            DataBlock::Columns(transpose(rows, cols.len()))
        } else {
            DataBlock::Rows(rows)
        };
        Ok(DataPage { data, next })
    }

    pub fn row_count(&self) -> VaultResult<u64> {
        self.rows.row_count()
    }

    /// Whether rows exist past `pos`.
    pub fn has_more(&self, pos: u64) -> VaultResult<bool> {
        Ok(self.rows.row_count()? > pos)
    }

    pub fn add_param(&mut self, name: &str, value: ParamValue) -> VaultResult<()> {
        self.add_params(vec![(name.to_string(), value)])
    }

    /// Add several parameters as one unit. If any name is taken, any value
    /// cannot be encoded, or the write fails, nothing is added.
    pub fn add_params(&mut self, params: Vec<(String, ParamValue)>) -> VaultResult<()> {
        for (i, (name, value)) in params.iter().enumerate() {
            self.meta.check_new_parameter(name)?;
            if params[..i].iter().any(|(other, _)| other == name) {
                return Err(VaultError::ParameterInUse { name: name.clone() });
            }
            value.flatten()?;
        }
        let before = self.meta.parameters.len();
        self.meta
            .parameters
            .extend(params.into_iter().map(|(name, value)| Parameter { name, value }));
        if let Err(e) = self
            .store
            .append_parameters(&self.meta, &self.meta.parameters[before..])
        {
            self.meta.parameters.truncate(before);
            return Err(e);
        }
        Ok(())
    }

    pub fn get_parameter(&self, name: &str, case_sensitive: bool) -> VaultResult<ParamValue> {
        self.meta.parameter(name, case_sensitive).cloned()
    }

    pub fn param_names(&self) -> Vec<String> {
        self.meta.parameter_names()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.meta.parameters
    }

    pub fn num_params(&self) -> usize {
        self.meta.parameters.len()
    }

    pub fn add_comment(&mut self, user: &str, text: &str) -> VaultResult<()> {
        let comment = Comment {
            timestamp: time::now(),
            user: user.to_string(),
            text: text.to_string(),
        };
        self.meta.comments.push(comment.clone());
        if let Err(e) = self.store.append_comment(&self.meta, &comment) {
            self.meta.comments.pop();
            return Err(e);
        }
        Ok(())
    }

    pub fn get_comments(&self, limit: Option<usize>, start: usize) -> (Vec<Comment>, usize) {
        self.meta.comments_page(limit, start)
    }

    pub fn num_comments(&self) -> usize {
        self.meta.comments.len()
    }

    /// Record an access and persist the timestamps.
    pub fn access(&mut self) -> VaultResult<()> {
        self.meta.accessed = time::now();
        self.timestamps_dirty = true;
        self.flush()
    }

    /// Persist timestamps changed since the last flush.
    pub fn flush(&mut self) -> VaultResult<()> {
        if self.timestamps_dirty {
            self.store.save_timestamps(&self.meta)?;
            self.timestamps_dirty = false;
        }
        Ok(())
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(dataset = %self.name, error = %e, "failed to save timestamps");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vault_core::Shape;

    fn float_columns() -> (Vec<Independent>, Vec<Dependent>) {
        (
            vec![Independent::scalar("Bias", "V")],
            vec![Dependent::scalar("Current", "Device A", "nA")],
        )
    }

    fn float_rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| vec![ColumnValue::F64(i as f64 * 0.5), ColumnValue::F64(i as f64 * 1.25)])
            .collect()
    }

    fn create(dir: &Path, name: &str, format: Format) -> Backend {
        let (indeps, deps) = float_columns();
        Backend::create(dir, name, format, "IV", indeps, deps, &StorageSettings::default()).unwrap()
    }

    #[test]
    fn test_version_dispatch() {
        assert_eq!(Format::from_version([1, 0, 0]).unwrap(), Format::LegacyCsv);
        assert_eq!(Format::from_version([2, 0, 0]).unwrap(), Format::Simple);
        assert_eq!(Format::from_version([3, 0, 0]).unwrap(), Format::Extended);
        assert_eq!(Format::from_version([7, 1, 0]).unwrap(), Format::Extended);
        assert!(Format::from_version([0, 9, 0]).is_err());
        assert_eq!("simple".parse::<Format>().unwrap(), Format::Simple);
        assert_eq!(Format::LegacyCsv.to_string(), "csv");
    }

    #[test]
    fn test_every_format_reopens_with_its_rows() {
        let dir = tempdir().unwrap();
        for (i, format) in [Format::LegacyCsv, Format::Simple, Format::Extended]
            .into_iter()
            .enumerate()
        {
            let name = format!("0000{} - {}", i + 1, format);
            {
                let mut backend = create(dir.path(), &name, format);
                backend.add_data(&float_rows(3)).unwrap();
                backend.add_param("gain", ParamValue::Int(10)).unwrap();
                backend.add_comment("alice", "first pass").unwrap();
            }
            let backend = Backend::open(dir.path(), &name, &StorageSettings::default()).unwrap();
            assert_eq!(backend.format(), format);
            assert_eq!(backend.title(), "IV");
            assert_eq!(backend.row_count().unwrap(), 3);
            let page = backend.get_data(None, 0, false, true).unwrap();
            assert_eq!(page.data, DataBlock::Rows(float_rows(3)));
            assert_eq!(page.next, 3);
            assert_eq!(backend.get_parameter("GAIN", false).unwrap(), ParamValue::Int(10));
            assert_eq!(backend.num_comments(), 1);
        }
        let names = Backend::list(dir.path()).unwrap();
        assert_eq!(names, vec!["00001 - csv", "00002 - simple", "00003 - extended"]);
    }

    #[test]
    fn test_pagination_matches_single_read() {
        let dir = tempdir().unwrap();
        let mut backend = create(dir.path(), "00001 - paged", Format::Extended);
        backend.add_data(&float_rows(4)).unwrap();
        backend.add_data(&float_rows(3)).unwrap();

        let all = backend.get_data(None, 0, false, false).unwrap();
        let first = backend.get_data(Some(5), 0, false, false).unwrap();
        let rest = backend.get_data(None, first.next, false, false).unwrap();
        let (DataBlock::Rows(mut joined), DataBlock::Rows(tail)) = (first.data, rest.data) else {
            panic!("expected row blocks");
        };
        joined.extend(tail);
        assert_eq!(DataBlock::Rows(joined), all.data);
        assert_eq!(rest.next, 7);
        assert!(!backend.has_more(7).unwrap());
        assert!(backend.has_more(6).unwrap());
    }

    #[test]
    fn test_csv_and_simple_reject_typed_columns() {
        let dir = tempdir().unwrap();
        let indeps = vec![Independent::new("n", Shape::scalar(), DataType::I32, "").unwrap()];
        for format in [Format::LegacyCsv, Format::Simple] {
            let err = Backend::create(
                dir.path(),
                "00001 - typed",
                format,
                "typed",
                indeps.clone(),
                vec![],
                &StorageSettings::default(),
            )
            .unwrap_err();
            assert!(matches!(err, VaultError::Unsupported(_)));
        }
        assert!(Backend::list(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_transpose_only_on_extended() {
        let dir = tempdir().unwrap();
        let mut simple = create(dir.path(), "00001 - s", Format::Simple);
        simple.add_data(&float_rows(2)).unwrap();
        assert!(matches!(
            simple.get_data(None, 0, true, false),
            Err(VaultError::Unsupported(_))
        ));
        assert_eq!(simple.row_type(), "*2v");
        assert_eq!(simple.transpose_type(), None);

        let mut extended = create(dir.path(), "00002 - e", Format::Extended);
        extended.add_data(&float_rows(2)).unwrap();
        let page = extended.get_data(None, 0, true, false).unwrap();
        assert_eq!(
            page.data,
            DataBlock::Columns(vec![
                vec![ColumnValue::F64(0.0), ColumnValue::F64(0.5)],
                vec![ColumnValue::F64(0.0), ColumnValue::F64(1.25)],
            ])
        );
        assert_eq!(page.data.len(), 2);
        assert_eq!(extended.transpose_type().unwrap(), "(*v[V]*v[nA])");
    }

    #[test]
    fn test_bad_row_width_writes_nothing() {
        let dir = tempdir().unwrap();
        for (i, format) in [Format::LegacyCsv, Format::Simple, Format::Extended]
            .into_iter()
            .enumerate()
        {
            let mut backend = create(dir.path(), &format!("{} - w", i), format);
            let mut rows = float_rows(2);
            rows.push(vec![ColumnValue::F64(1.0)]);
            assert!(matches!(
                backend.add_data(&rows),
                Err(VaultError::BadData { expected: 2, got: 1 })
            ));
            assert_eq!(backend.row_count().unwrap(), 0);
        }
    }

    #[test]
    fn test_duplicate_parameter_keeps_original() {
        let dir = tempdir().unwrap();
        let mut backend = create(dir.path(), "00001 - p", Format::LegacyCsv);
        backend.add_param("temp", ParamValue::from(4.2)).unwrap();
        assert!(matches!(
            backend.add_param("temp", ParamValue::from(300.0)),
            Err(VaultError::ParameterInUse { .. })
        ));
        assert!(matches!(
            backend.add_params(vec![
                ("a".into(), ParamValue::Int(1)),
                ("a".into(), ParamValue::Int(2)),
            ]),
            Err(VaultError::ParameterInUse { .. })
        ));
        assert_eq!(backend.param_names(), vec!["temp"]);
        assert_eq!(backend.get_parameter("temp", true).unwrap(), ParamValue::from(4.2));
        assert!(matches!(
            backend.get_parameter("missing", true),
            Err(VaultError::BadParameter { .. })
        ));
    }

    #[test]
    fn test_unencodable_parameter_adds_nothing() {
        let dir = tempdir().unwrap();
        for (i, format) in [Format::LegacyCsv, Format::Simple, Format::Extended]
            .into_iter()
            .enumerate()
        {
            let name = format!("0000{} - p", i + 1);
            {
                let mut backend = create(dir.path(), &name, format);
                let mixed = ParamValue::List(vec![ParamValue::Int(1), ParamValue::from("x")]);
                assert!(matches!(
                    backend.add_params(vec![
                        ("fine".into(), ParamValue::Int(1)),
                        ("mixed".into(), mixed),
                    ]),
                    Err(VaultError::Encoding(_))
                ));
                assert_eq!(backend.num_params(), 0);
                backend
                    .add_params(vec![
                        ("fine".into(), ParamValue::Int(1)),
                        ("also".into(), ParamValue::from(2.0)),
                    ])
                    .unwrap();
            }
            let backend = Backend::open(dir.path(), &name, &StorageSettings::default()).unwrap();
            assert_eq!(backend.param_names(), vec!["fine", "also"], "format {}", format);
        }
    }

    #[test]
    fn test_unknown_stored_versions() {
        let dir = tempdir().unwrap();
        let (indeps, deps) = float_columns();
        let meta = DatasetMetadata::new("future", indeps, deps);
        for (stem, version) in [("00001 - zero", [0u32, 1, 0]), ("00002 - four", [4, 2, 0])] {
            let path = dir.path().join(format!("{}.{}", stem, CONTAINER_EXTENSION));
            let container = Arc::new(Container::create(&path, Duration::from_secs(60)).unwrap());
            container.set_attr(crate::container::VERSION_ATTR, &version).unwrap();
            ContainerMetadata::new(container).initialize(&meta).unwrap();
        }

        let err = Backend::open(dir.path(), "00001 - zero", &StorageSettings::default()).unwrap_err();
        assert!(matches!(err, VaultError::Unsupported(_)));

        // Later major versions are read as the newest known layout.
        let backend = Backend::open(dir.path(), "00002 - four", &StorageSettings::default()).unwrap();
        assert_eq!(backend.format(), Format::Extended);
        assert_eq!(backend.title(), "future");
        assert_eq!(backend.row_count().unwrap(), 0);
    }

    #[test]
    fn test_container_with_csv_tag_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(format!("00001 - odd.{}", CONTAINER_EXTENSION));
        let container = Container::create(&path, Duration::from_secs(60)).unwrap();
        container.set_attr(crate::container::VERSION_ATTR, &[1u32, 0, 0]).unwrap();
        drop(container);
        assert!(matches!(
            Backend::open(dir.path(), "00001 - odd", &StorageSettings::default()),
            Err(VaultError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_open_missing_dataset() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Backend::open(dir.path(), "00009 - nope", &StorageSettings::default()),
            Err(VaultError::DatasetNotFound { .. })
        ));
    }
}
