//! Row and metadata stores backed by a [`Container`].

use super::RowStore;
use crate::container::Container;
use crate::metadata::{Comment, DatasetMetadata, MetadataStore, Parameter};
use bytes::BytesMut;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vault_core::{Dependent, Independent, ParamValue, RecordLayout, Row, VaultResult};

const TITLE_ATTR: &str = "title";
const INDEPENDENTS_ATTR: &str = "independents";
const DEPENDENTS_ATTR: &str = "dependents";
const TIMESTAMPS_ATTR: &str = "timestamps";
const PARAMETERS_LIST: &str = "parameters";
const COMMENTS_LIST: &str = "comments";

/// Rows encoded with a fixed [`RecordLayout`].
pub struct ContainerRowStore {
    container: Arc<Container>,
    layout: RecordLayout,
}

impl ContainerRowStore {
    pub fn new(container: Arc<Container>, layout: RecordLayout) -> Self {
        Self { container, layout }
    }
}

impl RowStore for ContainerRowStore {
    fn append(&mut self, rows: &[Row]) -> VaultResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut buf = BytesMut::new();
        self.layout.encode_rows(rows, &mut buf)?;
        self.container.append_rows(rows.len(), &buf)
    }

    fn row_count(&self) -> VaultResult<u64> {
        self.container.row_count()
    }

    fn read(&self, start: u64, limit: Option<usize>) -> VaultResult<Vec<Row>> {
        let total = self.container.row_count()?;
        let end = match limit {
            Some(limit) => total.min(start.saturating_add(limit as u64)),
            None => total,
        };
        if start >= end {
            return Ok(Vec::new());
        }

        let mut rows = Vec::with_capacity((end - start) as usize);
        for (first_row, count, bytes) in self.container.read_row_chunks(start, end)? {
            let decoded = self.layout.decode_rows(&bytes, count as usize)?;
            let skip = start.saturating_sub(first_row) as usize;
            let take = (end.min(first_row + count) - first_row) as usize - skip;
            rows.extend(decoded.into_iter().skip(skip).take(take));
        }
        Ok(rows)
    }
}

#[derive(Serialize, Deserialize)]
struct Timestamps {
    #[serde(with = "vault_core::time::text")]
    created: NaiveDateTime,
    #[serde(with = "vault_core::time::text")]
    accessed: NaiveDateTime,
    #[serde(with = "vault_core::time::text")]
    modified: NaiveDateTime,
}

impl From<&DatasetMetadata> for Timestamps {
    fn from(meta: &DatasetMetadata) -> Self {
        Self {
            created: meta.created,
            accessed: meta.accessed,
            modified: meta.modified,
        }
    }
}

/// Parameter values are stored as data URLs so the container never depends on
/// the in-memory value model.
#[derive(Serialize, Deserialize)]
struct ParameterRecord {
    name: String,
    data: String,
}

/// Metadata kept as attributes and item lists in the container.
pub struct ContainerMetadata {
    container: Arc<Container>,
}

impl ContainerMetadata {
    pub fn new(container: Arc<Container>) -> Self {
        Self { container }
    }
}

impl MetadataStore for ContainerMetadata {
    fn load(&mut self) -> VaultResult<DatasetMetadata> {
        let title: String = self.container.require_attr(TITLE_ATTR)?;
        let independents: Vec<Independent> = self.container.require_attr(INDEPENDENTS_ATTR)?;
        let dependents: Vec<Dependent> = self.container.require_attr(DEPENDENTS_ATTR)?;
        let stamps: Timestamps = self.container.require_attr(TIMESTAMPS_ATTR)?;
        let parameters = self
            .container
            .items::<ParameterRecord>(PARAMETERS_LIST)?
            .into_iter()
            .map(|p| {
                Ok(Parameter {
                    value: ParamValue::from_data_url(&p.data)?,
                    name: p.name,
                })
            })
            .collect::<VaultResult<_>>()?;
        let comments = self.container.items::<Comment>(COMMENTS_LIST)?;

        Ok(DatasetMetadata {
            title,
            created: stamps.created,
            accessed: stamps.accessed,
            modified: stamps.modified,
            independents,
            dependents,
            parameters,
            comments,
        })
    }

    fn initialize(&mut self, meta: &DatasetMetadata) -> VaultResult<()> {
        self.container.set_attr(TITLE_ATTR, &meta.title)?;
        self.container.set_attr(INDEPENDENTS_ATTR, &meta.independents)?;
        self.container.set_attr(DEPENDENTS_ATTR, &meta.dependents)?;
        self.container.set_attr(TIMESTAMPS_ATTR, &Timestamps::from(meta))?;
        self.append_parameters(meta, &meta.parameters)?;
        for comment in &meta.comments {
            self.append_comment(meta, comment)?;
        }
        Ok(())
    }

    fn append_parameters(&mut self, _meta: &DatasetMetadata, params: &[Parameter]) -> VaultResult<()> {
        let records = params
            .iter()
            .map(|param| {
                Ok(ParameterRecord {
                    name: param.name.clone(),
                    data: param.value.to_data_url()?,
                })
            })
            .collect::<VaultResult<Vec<_>>>()?;
        self.container.push_items(PARAMETERS_LIST, &records)
    }

    fn append_comment(&mut self, _meta: &DatasetMetadata, comment: &Comment) -> VaultResult<()> {
        self.container.push_item(COMMENTS_LIST, comment)
    }

    fn save_timestamps(&mut self, meta: &DatasetMetadata) -> VaultResult<()> {
        self.container.set_attr(TIMESTAMPS_ATTR, &Timestamps::from(meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;
    use std::time::Duration;
    use tempfile::tempdir;
    use vault_core::{ColumnValue, DataType, Shape, VaultError};

    fn typed_columns() -> (Vec<Independent>, Vec<Dependent>) {
        (
            vec![Independent::new("index", Shape::scalar(), DataType::I32, "").unwrap()],
            vec![
                Dependent::new("trace", "x", Shape(vec![3]), DataType::F64, "V").unwrap(),
                Dependent::new("label", "", Shape::scalar(), DataType::Str, "").unwrap(),
                Dependent::new("s21", "", Shape::scalar(), DataType::Complex128, "").unwrap(),
            ],
        )
    }

    fn typed_row(i: i32) -> Row {
        vec![
            ColumnValue::I32(i),
            ColumnValue::Array(vec![
                ColumnValue::F64(1.0),
                ColumnValue::F64(2.5),
                ColumnValue::F64(f64::from(i)),
            ]),
            ColumnValue::Str(format!("row {}", i)),
            ColumnValue::Complex128(Complex64::new(0.5, -1.0)),
        ]
    }

    #[test]
    fn test_reads_span_chunk_boundaries() {
        let dir = tempdir().unwrap();
        let container =
            Arc::new(Container::create(&dir.path().join("t.dvc"), Duration::from_secs(60)).unwrap());
        let (indeps, deps) = typed_columns();
        let mut store = ContainerRowStore::new(container, RecordLayout::new(&indeps, &deps));

        store.append(&[typed_row(0), typed_row(1)]).unwrap();
        store.append(&[typed_row(2), typed_row(3), typed_row(4)]).unwrap();
        store.append(&[]).unwrap();
        assert_eq!(store.row_count().unwrap(), 5);

        let middle = store.read(1, Some(3)).unwrap();
        assert_eq!(middle, vec![typed_row(1), typed_row(2), typed_row(3)]);
        assert_eq!(store.read(4, None).unwrap(), vec![typed_row(4)]);
        assert!(store.read(5, None).unwrap().is_empty());
        assert!(store.read(9, Some(2)).unwrap().is_empty());
    }

    #[test]
    fn test_mistyped_row_is_rejected_whole() {
        let dir = tempdir().unwrap();
        let container =
            Arc::new(Container::create(&dir.path().join("m.dvc"), Duration::from_secs(60)).unwrap());
        let (indeps, deps) = typed_columns();
        let mut store = ContainerRowStore::new(container, RecordLayout::new(&indeps, &deps));

        let mut bad = typed_row(1);
        bad[2] = ColumnValue::F64(3.0);
        let err = store.append(&[typed_row(0), bad]).unwrap_err();
        assert!(matches!(err, VaultError::TypeMismatch { column: 2, .. }));
        assert_eq!(store.row_count().unwrap(), 0);
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.dvc");
        let container = Arc::new(Container::create(&path, Duration::from_secs(60)).unwrap());
        let (indeps, deps) = typed_columns();
        let mut meta = DatasetMetadata::new("sweep", indeps, deps);
        let mut store = ContainerMetadata::new(container);
        store.initialize(&meta).unwrap();

        let param = Parameter {
            name: "fields".into(),
            value: ParamValue::List(vec![ParamValue::from(1.0), ParamValue::from(2.0)]),
        };
        meta.parameters.push(param.clone());
        store.append_parameters(&meta, &[param]).unwrap();
        let comment = Comment {
            timestamp: vault_core::time::now(),
            user: "bob".into(),
            text: "warming up".into(),
        };
        meta.comments.push(comment.clone());
        store.append_comment(&meta, &comment).unwrap();
        drop(store);

        let reopened = Arc::new(Container::open(&path, Duration::from_secs(60)).unwrap());
        assert_eq!(ContainerMetadata::new(reopened).load().unwrap(), meta);
    }
}
