//! Fixed record layout for binary row storage.
//!
//! A [`RecordLayout`] is derived from a dataset's columns at creation time and
//! never changes afterwards. Every row written is validated against it; a row
//! that does not fit fails the whole write before anything reaches disk.
//!
//! # Encoding
//!
//! Values are little-endian and concatenated in column order:
//!
//! | type | bytes |
//! |------|-------|
//! | `i`  | 4 (i32) |
//! | `v`  | 8 (f64) |
//! | `c`  | 16 (re, im f64) |
//! | `s`  | 4 (u32 length) + UTF-8 |
//! | `t`  | 8 (i64) |
//!
//! Shaped columns store `shape.element_count()` values back to back.

use crate::column::{ColumnValue, DataType, Dependent, Independent, Row, Shape};
use crate::error::{VaultError, VaultResult};
use bytes::{Buf, BufMut, BytesMut};
use num_complex::Complex64;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub datatype: DataType,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    fields: Vec<FieldSpec>,
}

impl RecordLayout {
    pub fn new(independents: &[Independent], dependents: &[Dependent]) -> Self {
        let fields = independents
            .iter()
            .map(|c| FieldSpec {
                datatype: c.datatype,
                shape: c.shape.clone(),
            })
            .chain(dependents.iter().map(|c| FieldSpec {
                datatype: c.datatype,
                shape: c.shape.clone(),
            }))
            .collect();
        Self { fields }
    }

    /// Layout with `width` scalar float64 columns.
    pub fn all_float(width: usize) -> Self {
        Self {
            fields: vec![
                FieldSpec {
                    datatype: DataType::F64,
                    shape: Shape::scalar(),
                };
                width
            ],
        }
    }

    pub fn width(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn is_all_scalar_float(&self) -> bool {
        self.fields
            .iter()
            .all(|f| f.datatype == DataType::F64 && f.shape.is_scalar())
    }

    pub fn check_width(&self, row: &Row) -> VaultResult<()> {
        if row.len() != self.fields.len() {
            return Err(VaultError::BadData {
                expected: self.fields.len(),
                got: row.len(),
            });
        }
        Ok(())
    }

    /// Encode all rows into `buf`. Nothing is appended if any row is invalid.
    pub fn encode_rows(&self, rows: &[Row], buf: &mut BytesMut) -> VaultResult<()> {
        let mut scratch = BytesMut::new();
        for row in rows {
            self.check_width(row)?;
            for (column, (field, value)) in self.fields.iter().zip(row).enumerate() {
                encode_field(column, field, value, &mut scratch)?;
            }
        }
        buf.put(scratch);
        Ok(())
    }

    /// Decode exactly `count` rows from `data`.
    pub fn decode_rows(&self, mut data: &[u8], count: usize) -> VaultResult<Vec<Row>> {
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            let mut row = Vec::with_capacity(self.fields.len());
            for field in &self.fields {
                row.push(decode_field(field, &mut data)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

fn encode_field(
    column: usize,
    field: &FieldSpec,
    value: &ColumnValue,
    buf: &mut BytesMut,
) -> VaultResult<()> {
    if field.shape.is_scalar() {
        return encode_scalar(column, field.datatype, value, buf);
    }
    let expected = field.shape.element_count();
    match value {
        ColumnValue::Array(items) if items.len() == expected => {
            for item in items {
                encode_scalar(column, field.datatype, item, buf)?;
            }
            Ok(())
        }
        ColumnValue::Array(items) => Err(VaultError::TypeMismatch {
            column,
            expected: format!("{} elements", expected),
            got: format!("{} elements", items.len()),
        }),
        other => Err(mismatch(column, field.datatype, other)),
    }
}

fn mismatch(column: usize, datatype: DataType, got: &ColumnValue) -> VaultError {
    VaultError::TypeMismatch {
        column,
        expected: format!("'{}'", datatype),
        got: got.kind().to_string(),
    }
}

fn encode_scalar(
    column: usize,
    datatype: DataType,
    value: &ColumnValue,
    buf: &mut BytesMut,
) -> VaultResult<()> {
    match (datatype, value) {
        (DataType::I32, ColumnValue::I32(v)) => buf.put_i32_le(*v),
        (DataType::F64, ColumnValue::F64(v)) => buf.put_f64_le(*v),
        (DataType::F64, ColumnValue::I32(v)) => buf.put_f64_le(f64::from(*v)),
        (DataType::Complex128, ColumnValue::Complex128(c)) => {
            buf.put_f64_le(c.re);
            buf.put_f64_le(c.im);
        }
        (DataType::Complex128, ColumnValue::F64(v)) => {
            buf.put_f64_le(*v);
            buf.put_f64_le(0.0);
        }
        (DataType::Complex128, ColumnValue::I32(v)) => {
            buf.put_f64_le(f64::from(*v));
            buf.put_f64_le(0.0);
        }
        (DataType::Str, ColumnValue::Str(s)) => {
            buf.put_u32_le(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        (DataType::Timestamp, ColumnValue::I64(v)) => buf.put_i64_le(*v),
        (DataType::Timestamp, ColumnValue::I32(v)) => buf.put_i64_le(i64::from(*v)),
        (datatype, other) => return Err(mismatch(column, datatype, other)),
    }
    Ok(())
}

fn need(data: &[u8], n: usize) -> VaultResult<()> {
    if data.remaining() < n {
        return Err(VaultError::Encoding(format!(
            "truncated record: need {} bytes, {} left",
            n,
            data.remaining()
        )));
    }
    Ok(())
}

fn decode_field(field: &FieldSpec, data: &mut &[u8]) -> VaultResult<ColumnValue> {
    if field.shape.is_scalar() {
        return decode_scalar(field.datatype, data);
    }
    let items = (0..field.shape.element_count())
        .map(|_| decode_scalar(field.datatype, data))
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(ColumnValue::Array(items))
}

fn decode_scalar(datatype: DataType, data: &mut &[u8]) -> VaultResult<ColumnValue> {
    Ok(match datatype {
        DataType::I32 => {
            need(data, 4)?;
            ColumnValue::I32(data.get_i32_le())
        }
        DataType::F64 => {
            need(data, 8)?;
            ColumnValue::F64(data.get_f64_le())
        }
        DataType::Complex128 => {
            need(data, 16)?;
            let re = data.get_f64_le();
            let im = data.get_f64_le();
            ColumnValue::Complex128(Complex64::new(re, im))
        }
        DataType::Str => {
            need(data, 4)?;
            let len = data.get_u32_le() as usize;
            need(data, len)?;
            let text = String::from_utf8(data[..len].to_vec())
                .map_err(|e| VaultError::Encoding(format!("invalid UTF-8 in string column: {}", e)))?;
            data.advance(len);
            ColumnValue::Str(text)
        }
        DataType::Timestamp => {
            need(data, 8)?;
            ColumnValue::I64(data.get_i64_le())
        }
    })
}
