//! Dataset metadata and its persistence strategies.
//!
//! [`DatasetMetadata`] is the in-memory model every backend shares: title,
//! timestamps, columns, parameters, and comments. How it reaches disk is a
//! separate capability, [`MetadataStore`], injected into each backend:
//!
//! - [`SideFileMetadata`] writes a TOML file next to the data file and rewrites
//!   it on every change (legacy CSV datasets).
//! - `ContainerMetadata` (see [`crate::backend::binary`]) appends attribute
//!   records inside the binary container.
//!
//! Keeping row encoding and metadata encoding apart means any row store can be
//! paired with any metadata store.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use vault_core::time;
use vault_core::{DataType, Dependent, Independent, ParamValue, Shape, VaultError, VaultResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(with = "vault_core::time::text")]
    pub timestamp: NaiveDateTime,
    pub user: String,
    pub text: String,
}

/// Everything about a dataset except its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMetadata {
    pub title: String,
    pub created: NaiveDateTime,
    pub accessed: NaiveDateTime,
    pub modified: NaiveDateTime,
    pub independents: Vec<Independent>,
    pub dependents: Vec<Dependent>,
    pub parameters: Vec<Parameter>,
    pub comments: Vec<Comment>,
}

impl DatasetMetadata {
    pub fn new(
        title: impl Into<String>,
        independents: Vec<Independent>,
        dependents: Vec<Dependent>,
    ) -> Self {
        let now = time::now();
        Self {
            title: title.into(),
            created: now,
            accessed: now,
            modified: now,
            independents,
            dependents,
            parameters: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Fail with `ParameterInUse` if `name` already exists (case-sensitive).
    pub fn check_new_parameter(&self, name: &str) -> VaultResult<()> {
        if self.parameters.iter().any(|p| p.name == name) {
            return Err(VaultError::ParameterInUse {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn parameter(&self, name: &str, case_sensitive: bool) -> VaultResult<&ParamValue> {
        let found = if case_sensitive {
            self.parameters.iter().find(|p| p.name == name)
        } else {
            self.parameters
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
        };
        found.map(|p| &p.value).ok_or_else(|| VaultError::BadParameter {
            name: name.to_string(),
        })
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Up to `limit` comments from `start`, plus the position to resume from.
    pub fn comments_page(&self, limit: Option<usize>, start: usize) -> (Vec<Comment>, usize) {
        let start = start.min(self.comments.len());
        let end = match limit {
            Some(limit) => (start + limit).min(self.comments.len()),
            None => self.comments.len(),
        };
        (self.comments[start..end].to_vec(), end)
    }
}

/// Persistence strategy for [`DatasetMetadata`].
///
/// Every mutating call receives the full metadata with the change already
/// applied, plus the item that changed, so a store can either rewrite
/// everything or append just the delta.
pub trait MetadataStore: Send {
    fn load(&mut self) -> VaultResult<DatasetMetadata>;

    fn initialize(&mut self, meta: &DatasetMetadata) -> VaultResult<()>;

    /// Persist `params`, already pushed onto `meta.parameters`, as one unit.
    fn append_parameters(&mut self, meta: &DatasetMetadata, params: &[Parameter]) -> VaultResult<()>;

    fn append_comment(&mut self, meta: &DatasetMetadata, comment: &Comment) -> VaultResult<()>;

    fn save_timestamps(&mut self, meta: &DatasetMetadata) -> VaultResult<()>;
}

// =============================================================================
// Side-file metadata
// =============================================================================

#[derive(Serialize, Deserialize)]
struct SideFile {
    general: General,
    #[serde(default, rename = "independent")]
    independents: Vec<IndependentEntry>,
    #[serde(default, rename = "dependent")]
    dependents: Vec<DependentEntry>,
    #[serde(default, rename = "parameter")]
    parameters: Vec<ParameterEntry>,
    #[serde(default, rename = "comment")]
    comments: Vec<Comment>,
}

#[derive(Serialize, Deserialize)]
struct General {
    title: String,
    created: String,
    accessed: String,
    modified: String,
    independent: usize,
    dependent: usize,
    parameters: usize,
    comments: usize,
}

fn default_type() -> String {
    "v".to_string()
}

#[derive(Serialize, Deserialize)]
struct IndependentEntry {
    label: String,
    units: String,
    #[serde(default = "default_type", rename = "type")]
    datatype: String,
    #[serde(default)]
    shape: Shape,
}

/// Legacy layout: `category` holds the column label, `label` the legend.
#[derive(Serialize, Deserialize)]
struct DependentEntry {
    category: String,
    label: String,
    units: String,
    #[serde(default = "default_type", rename = "type")]
    datatype: String,
    #[serde(default)]
    shape: Shape,
}

#[derive(Serialize, Deserialize)]
struct ParameterEntry {
    label: String,
    data: String,
}

fn parse_type(text: &str) -> VaultResult<DataType> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(code), None) => DataType::from_code(code),
        _ => Err(VaultError::Metadata(format!("bad column type '{}'", text))),
    }
}

/// Metadata kept in a TOML file beside the data file.
pub struct SideFileMetadata {
    path: PathBuf,
}

impl SideFileMetadata {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, meta: &DatasetMetadata) -> VaultResult<()> {
        let doc = SideFile {
            general: General {
                title: meta.title.clone(),
                created: time::format(&meta.created),
                accessed: time::format(&meta.accessed),
                modified: time::format(&meta.modified),
                independent: meta.independents.len(),
                dependent: meta.dependents.len(),
                parameters: meta.parameters.len(),
                comments: meta.comments.len(),
            },
            independents: meta
                .independents
                .iter()
                .map(|c| IndependentEntry {
                    label: c.label.clone(),
                    units: c.unit.clone(),
                    datatype: c.datatype.code().to_string(),
                    shape: c.shape.clone(),
                })
                .collect(),
            dependents: meta
                .dependents
                .iter()
                .map(|c| DependentEntry {
                    category: c.label.clone(),
                    label: c.legend.clone(),
                    units: c.unit.clone(),
                    datatype: c.datatype.code().to_string(),
                    shape: c.shape.clone(),
                })
                .collect(),
            parameters: meta
                .parameters
                .iter()
                .map(|p| {
                    Ok(ParameterEntry {
                        label: p.name.clone(),
                        data: p.value.to_data_url()?,
                    })
                })
                .collect::<VaultResult<_>>()?,
            comments: meta.comments.clone(),
        };
        let text = toml::to_string(&doc).map_err(|e| VaultError::Metadata(e.to_string()))?;

        // Readers never observe a half-written file.
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl MetadataStore for SideFileMetadata {
    fn load(&mut self) -> VaultResult<DatasetMetadata> {
        let text = fs::read_to_string(&self.path)?;
        let doc: SideFile = toml::from_str(&text)
            .map_err(|e| VaultError::corrupt(&self.path, e.to_string()))?;

        let counts = (
            doc.independents.len(),
            doc.dependents.len(),
            doc.parameters.len(),
            doc.comments.len(),
        );
        let declared = (
            doc.general.independent,
            doc.general.dependent,
            doc.general.parameters,
            doc.general.comments,
        );
        if counts != declared {
            return Err(VaultError::corrupt(
                &self.path,
                format!("declared counts {:?} but found {:?}", declared, counts),
            ));
        }

        let independents = doc
            .independents
            .into_iter()
            .map(|e| Independent::new(e.label, e.shape, parse_type(&e.datatype)?, e.units))
            .collect::<VaultResult<_>>()?;
        let dependents = doc
            .dependents
            .into_iter()
            .map(|e| Dependent::new(e.category, e.label, e.shape, parse_type(&e.datatype)?, e.units))
            .collect::<VaultResult<_>>()?;
        let parameters = doc
            .parameters
            .into_iter()
            .map(|e| {
                Ok(Parameter {
                    value: ParamValue::from_data_url(&e.data)?,
                    name: e.label,
                })
            })
            .collect::<VaultResult<_>>()?;

        Ok(DatasetMetadata {
            title: doc.general.title,
            created: time::parse(&doc.general.created)?,
            accessed: time::parse(&doc.general.accessed)?,
            modified: time::parse(&doc.general.modified)?,
            independents,
            dependents,
            parameters,
            comments: doc.comments,
        })
    }

    fn initialize(&mut self, meta: &DatasetMetadata) -> VaultResult<()> {
        self.write(meta)
    }

    fn append_parameters(&mut self, meta: &DatasetMetadata, _params: &[Parameter]) -> VaultResult<()> {
        self.write(meta)
    }

    fn append_comment(&mut self, meta: &DatasetMetadata, _comment: &Comment) -> VaultResult<()> {
        self.write(meta)
    }

    fn save_timestamps(&mut self, meta: &DatasetMetadata) -> VaultResult<()> {
        self.write(meta)
    }
}
