//! Column descriptors and typed row values.
//!
//! Columns are fixed when a dataset is created. Each column has a base
//! [`DataType`] and a [`Shape`]; a shape of `[1]` is a scalar column, anything
//! else stores a row-major array of the base type in every row.

use crate::error::{VaultError, VaultResult};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// `i`: 32-bit signed integer.
    I32,
    /// `v`: 64-bit float, optionally with a unit.
    F64,
    /// `c`: 128-bit complex, optionally with a unit.
    Complex128,
    /// `s`: UTF-8 string.
    Str,
    /// `t`: 64-bit integer timestamp.
    Timestamp,
}

impl DataType {
    pub fn code(self) -> char {
        match self {
            DataType::I32 => 'i',
            DataType::F64 => 'v',
            DataType::Complex128 => 'c',
            DataType::Str => 's',
            DataType::Timestamp => 't',
        }
    }

    pub fn from_code(code: char) -> VaultResult<Self> {
        match code {
            'i' => Ok(DataType::I32),
            'v' => Ok(DataType::F64),
            'c' => Ok(DataType::Complex128),
            's' => Ok(DataType::Str),
            't' => Ok(DataType::Timestamp),
            other => Err(VaultError::Encoding(format!("unknown column type '{}'", other))),
        }
    }

    /// Only real and complex values carry physical units.
    pub fn allows_unit(self) -> bool {
        matches!(self, DataType::F64 | DataType::Complex128)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Per-row shape of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    pub fn scalar() -> Self {
        Shape(vec![1])
    }

    pub fn is_scalar(&self) -> bool {
        self.0.iter().all(|&d| d == 1)
    }

    /// Number of base values stored per row.
    pub fn element_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Array rank used in type tags; scalars have rank 0.
    pub fn rank(&self) -> usize {
        if self.is_scalar() {
            0
        } else {
            self.0.len()
        }
    }
}

impl Default for Shape {
    fn default() -> Self {
        Self::scalar()
    }
}

/// A swept (independent) variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Independent {
    pub label: String,
    pub shape: Shape,
    pub datatype: DataType,
    pub unit: String,
}

/// A measured (dependent) variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependent {
    pub label: String,
    pub legend: String,
    pub shape: Shape,
    pub datatype: DataType,
    pub unit: String,
}

fn check_unit(label: &str, datatype: DataType, unit: &str) -> VaultResult<()> {
    if !unit.is_empty() && !datatype.allows_unit() {
        return Err(VaultError::TypeMismatch {
            column: 0,
            expected: format!("no unit for '{}' column '{}'", datatype, label),
            got: unit.to_string(),
        });
    }
    Ok(())
}

/// Split `"label [unit]"` into its parts.
fn split_unit(text: &str) -> (&str, &str) {
    let text = text.trim();
    if let (Some(open), true) = (text.rfind('['), text.ends_with(']')) {
        return (text[..open].trim(), text[open + 1..text.len() - 1].trim());
    }
    (text, "")
}

impl Independent {
    pub fn new(
        label: impl Into<String>,
        shape: Shape,
        datatype: DataType,
        unit: impl Into<String>,
    ) -> VaultResult<Self> {
        let (label, unit) = (label.into(), unit.into());
        check_unit(&label, datatype, &unit)?;
        Ok(Self {
            label,
            shape,
            datatype,
            unit,
        })
    }

    /// Scalar float column, the only kind legacy datasets support.
    pub fn scalar(label: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            shape: Shape::scalar(),
            datatype: DataType::F64,
            unit: unit.into(),
        }
    }

    /// Parse the legacy `"label [unit]"` form.
    pub fn parse(text: &str) -> Self {
        let (label, unit) = split_unit(text);
        Self::scalar(label, unit)
    }
}

impl Dependent {
    pub fn new(
        label: impl Into<String>,
        legend: impl Into<String>,
        shape: Shape,
        datatype: DataType,
        unit: impl Into<String>,
    ) -> VaultResult<Self> {
        let (label, unit) = (label.into(), unit.into());
        check_unit(&label, datatype, &unit)?;
        Ok(Self {
            label,
            legend: legend.into(),
            shape,
            datatype,
            unit,
        })
    }

    pub fn scalar(
        label: impl Into<String>,
        legend: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            legend: legend.into(),
            shape: Shape::scalar(),
            datatype: DataType::F64,
            unit: unit.into(),
        }
    }

    /// Parse the legacy `"label (legend) [unit]"` form; legend and unit are optional.
    pub fn parse(text: &str) -> Self {
        let (rest, unit) = split_unit(text);
        if let (Some(open), true) = (rest.find('('), rest.ends_with(')')) {
            let label = rest[..open].trim();
            let legend = rest[open + 1..rest.len() - 1].trim();
            return Self::scalar(label, legend, unit);
        }
        Self::scalar(rest, "", unit)
    }
}

/// Uniform view over independent and dependent columns.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRef<'a> {
    pub label: &'a str,
    pub shape: &'a Shape,
    pub datatype: DataType,
    pub unit: &'a str,
}

impl<'a> From<&'a Independent> for ColumnRef<'a> {
    fn from(col: &'a Independent) -> Self {
        ColumnRef {
            label: &col.label,
            shape: &col.shape,
            datatype: col.datatype,
            unit: &col.unit,
        }
    }
}

impl<'a> From<&'a Dependent> for ColumnRef<'a> {
    fn from(col: &'a Dependent) -> Self {
        ColumnRef {
            label: &col.label,
            shape: &col.shape,
            datatype: col.datatype,
            unit: &col.unit,
        }
    }
}

/// All columns of a dataset in storage order: independents, then dependents.
pub fn columns<'a>(
    independents: &'a [Independent],
    dependents: &'a [Dependent],
) -> Vec<ColumnRef<'a>> {
    independents
        .iter()
        .map(ColumnRef::from)
        .chain(dependents.iter().map(ColumnRef::from))
        .collect()
}

/// One value in a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnValue {
    I32(i32),
    F64(f64),
    Complex128(Complex64),
    Str(String),
    I64(i64),
    /// Row-major values of a shaped column.
    Array(Vec<ColumnValue>),
}

impl ColumnValue {
    /// Short description used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ColumnValue::I32(_) => "int32",
            ColumnValue::F64(_) => "float64",
            ColumnValue::Complex128(_) => "complex128",
            ColumnValue::Str(_) => "string",
            ColumnValue::I64(_) => "int64",
            ColumnValue::Array(_) => "array",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::F64(v) => Some(*v),
            ColumnValue::I32(v) => Some(f64::from(*v)),
            _ => None,
        }
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::F64(v)
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::I32(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Str(v.to_string())
    }
}

impl From<Complex64> for ColumnValue {
    fn from(v: Complex64) -> Self {
        ColumnValue::Complex128(v)
    }
}

/// A single record: one value per column.
pub type Row = Vec<ColumnValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_descriptors() {
        let indep = Independent::parse("Frequency [Hz]");
        assert_eq!(indep.label, "Frequency");
        assert_eq!(indep.unit, "Hz");

        let dep = Dependent::parse("Power (Trace 1) [dBm]");
        assert_eq!(dep.label, "Power");
        assert_eq!(dep.legend, "Trace 1");
        assert_eq!(dep.unit, "dBm");

        let bare = Dependent::parse("Counts");
        assert_eq!(bare.label, "Counts");
        assert!(bare.legend.is_empty());
        assert!(bare.unit.is_empty());
    }

    #[test]
    fn test_unit_only_on_real_and_complex() {
        assert!(Independent::new("n", Shape::scalar(), DataType::I32, "Hz").is_err());
        assert!(Dependent::new("s", "", Shape::scalar(), DataType::Str, "V").is_err());
        assert!(Dependent::new("z", "", Shape::scalar(), DataType::Complex128, "V").is_ok());
    }

    #[test]
    fn test_shape_rank() {
        assert_eq!(Shape::scalar().rank(), 0);
        assert_eq!(Shape(vec![3]).rank(), 1);
        assert_eq!(Shape(vec![2, 4]).rank(), 2);
        assert_eq!(Shape(vec![2, 4]).element_count(), 8);
    }
}
