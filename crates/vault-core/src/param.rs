//! Typed parameter values and their self-describing text encoding.
//!
//! Parameters are arbitrary typed values attached to a dataset. To store them in
//! text metadata (or in container attributes) independent of the host format, a
//! value is flattened to a type tag plus a binary payload:
//!
//! ```text
//! u32 LE tag length | tag (UTF-8) | payload
//! ```
//!
//! and the bytes are wrapped in a base64 data URL with a fixed prefix.
//!
//! # Tag grammar
//!
//! | tag      | value | payload |
//! |----------|-------|---------|
//! | `_`      | none | empty |
//! | `b`      | bool | 1 byte |
//! | `i`      | i64 | 8 bytes |
//! | `v[u]`   | f64 with optional unit | 8 bytes |
//! | `c[u]`   | complex with optional unit | 16 bytes |
//! | `s`      | string | u32 length + UTF-8 |
//! | `y`      | bytes | u32 length + raw |
//! | `t`      | UTC time | i64 microseconds since epoch |
//! | `*T`     | homogeneous list of `T` | u32 count + elements |
//! | `(T..)`  | cluster (tuple) | elements in order |

use crate::error::{VaultError, VaultResult};
use base64::{engine::general_purpose, Engine as _};
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::Serialize;
use std::fmt;

/// Prefix of every encoded parameter value.
pub const DATA_URL_PREFIX: &str = "data:application/x-vault-data;base64,";

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParamValue {
    None,
    Bool(bool),
    Int(i64),
    Value(f64, Option<String>),
    Complex(Complex64, Option<String>),
    Str(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    /// Homogeneous list; every element must have the same tag.
    List(Vec<ParamValue>),
    /// Heterogeneous fixed-length tuple.
    Cluster(Vec<ParamValue>),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Value(v, None)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::None => write!(f, "None"),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Value(v, None) => write!(f, "{}", v),
            ParamValue::Value(v, Some(unit)) => write!(f, "{} {}", v, unit),
            ParamValue::Complex(c, None) => write!(f, "{}", c),
            ParamValue::Complex(c, Some(unit)) => write!(f, "{} {}", c, unit),
            ParamValue::Str(s) => write!(f, "{:?}", s),
            ParamValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            ParamValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            ParamValue::Cluster(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Parsed type tag.
#[derive(Debug, Clone, PartialEq)]
enum Tag {
    None,
    Bool,
    Int,
    Value(Option<String>),
    Complex(Option<String>),
    Str,
    Bytes,
    Time,
    List(Box<Tag>),
    Cluster(Vec<Tag>),
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::None => write!(f, "_"),
            Tag::Bool => write!(f, "b"),
            Tag::Int => write!(f, "i"),
            Tag::Value(None) => write!(f, "v"),
            Tag::Value(Some(u)) => write!(f, "v[{}]", u),
            Tag::Complex(None) => write!(f, "c"),
            Tag::Complex(Some(u)) => write!(f, "c[{}]", u),
            Tag::Str => write!(f, "s"),
            Tag::Bytes => write!(f, "y"),
            Tag::Time => write!(f, "t"),
            Tag::List(elem) => write!(f, "*{}", elem),
            Tag::Cluster(items) => {
                write!(f, "(")?;
                for item in items {
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Tag {
    /// Smallest payload a value of this tag can occupy.
    fn min_size(&self) -> usize {
        match self {
            Tag::None => 0,
            Tag::Bool => 1,
            Tag::Int | Tag::Value(_) | Tag::Time => 8,
            Tag::Complex(_) => 16,
            Tag::Str | Tag::Bytes | Tag::List(_) => 4,
            Tag::Cluster(items) => items.iter().map(Tag::min_size).sum(),
        }
    }
}

/// Deepest list/cluster nesting accepted in a type tag.
const MAX_TAG_DEPTH: usize = 32;

/// Largest element count accepted for lists whose elements carry no payload.
const MAX_EMPTY_ITEMS: usize = 1 << 16;

struct TagParser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> TagParser<'a> {
    fn parse(text: &'a str) -> VaultResult<Tag> {
        let mut parser = TagParser { text, pos: 0 };
        let tag = parser.tag(0)?;
        if parser.pos != text.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(tag)
    }

    fn error(&self, what: &str) -> VaultError {
        VaultError::Encoding(format!("bad type tag '{}' at {}: {}", self.text, self.pos, what))
    }

    fn next(&mut self) -> Option<char> {
        let ch = self.text[self.pos..].chars().next()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn unit(&mut self) -> VaultResult<Option<String>> {
        if self.peek() != Some('[') {
            return Ok(None);
        }
        self.pos += 1;
        let end = self.text[self.pos..]
            .find(']')
            .ok_or_else(|| self.error("unterminated unit"))?;
        let unit = self.text[self.pos..self.pos + end].to_string();
        self.pos += end + 1;
        Ok(Some(unit))
    }

    fn tag(&mut self, depth: usize) -> VaultResult<Tag> {
        if depth > MAX_TAG_DEPTH {
            return Err(self.error("nested too deeply"));
        }
        match self.next() {
            Some('_') => Ok(Tag::None),
            Some('b') => Ok(Tag::Bool),
            Some('i') => Ok(Tag::Int),
            Some('v') => Ok(Tag::Value(self.unit()?)),
            Some('c') => Ok(Tag::Complex(self.unit()?)),
            Some('s') => Ok(Tag::Str),
            Some('y') => Ok(Tag::Bytes),
            Some('t') => Ok(Tag::Time),
            Some('*') => Ok(Tag::List(Box::new(self.tag(depth + 1)?))),
            Some('(') => {
                let mut items = Vec::new();
                while self.peek() != Some(')') {
                    if self.peek().is_none() {
                        return Err(self.error("unterminated cluster"));
                    }
                    items.push(self.tag(depth + 1)?);
                }
                self.pos += 1;
                Ok(Tag::Cluster(items))
            }
            Some(_) => Err(self.error("unknown type character")),
            None => Err(self.error("unexpected end")),
        }
    }
}

impl ParamValue {
    fn tag(&self) -> VaultResult<Tag> {
        Ok(match self {
            ParamValue::None => Tag::None,
            ParamValue::Bool(_) => Tag::Bool,
            ParamValue::Int(_) => Tag::Int,
            ParamValue::Value(_, unit) => Tag::Value(unit.clone()),
            ParamValue::Complex(_, unit) => Tag::Complex(unit.clone()),
            ParamValue::Str(_) => Tag::Str,
            ParamValue::Bytes(_) => Tag::Bytes,
            ParamValue::Time(_) => Tag::Time,
            ParamValue::List(items) => {
                let elem = match items.first() {
                    Some(first) => first.tag()?,
                    None => Tag::None,
                };
                for item in items.iter().skip(1) {
                    let other = item.tag()?;
                    if other != elem {
                        return Err(VaultError::Encoding(format!(
                            "list elements must share a type: '{}' vs '{}'",
                            elem, other
                        )));
                    }
                }
                Tag::List(Box::new(elem))
            }
            ParamValue::Cluster(items) => {
                Tag::Cluster(items.iter().map(ParamValue::tag).collect::<VaultResult<_>>()?)
            }
        })
    }

    /// The type tag string of this value.
    pub fn type_tag(&self) -> VaultResult<String> {
        Ok(self.tag()?.to_string())
    }

    fn put_payload(&self, buf: &mut BytesMut) {
        match self {
            ParamValue::None => {}
            ParamValue::Bool(v) => buf.put_u8(u8::from(*v)),
            ParamValue::Int(v) => buf.put_i64_le(*v),
            ParamValue::Value(v, _) => buf.put_f64_le(*v),
            ParamValue::Complex(c, _) => {
                buf.put_f64_le(c.re);
                buf.put_f64_le(c.im);
            }
            ParamValue::Str(s) => {
                buf.put_u32_le(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            ParamValue::Bytes(b) => {
                buf.put_u32_le(b.len() as u32);
                buf.put_slice(b);
            }
            ParamValue::Time(t) => buf.put_i64_le(t.timestamp_micros()),
            ParamValue::List(items) => {
                buf.put_u32_le(items.len() as u32);
                for item in items {
                    item.put_payload(buf);
                }
            }
            ParamValue::Cluster(items) => {
                for item in items {
                    item.put_payload(buf);
                }
            }
        }
    }

    /// Flatten to tag + payload bytes.
    pub fn flatten(&self) -> VaultResult<Vec<u8>> {
        let tag = self.tag()?.to_string();
        let mut buf = BytesMut::new();
        buf.put_u32_le(tag.len() as u32);
        buf.put_slice(tag.as_bytes());
        self.put_payload(&mut buf);
        Ok(buf.to_vec())
    }

    /// Inverse of [`ParamValue::flatten`].
    pub fn unflatten(mut data: &[u8]) -> VaultResult<Self> {
        take(&data, 4)?;
        let tag_len = data.get_u32_le() as usize;
        take(&data, tag_len)?;
        let tag_text = std::str::from_utf8(&data[..tag_len])
            .map_err(|e| VaultError::Encoding(format!("type tag is not UTF-8: {}", e)))?
            .to_string();
        data.advance(tag_len);
        let tag = TagParser::parse(&tag_text)?;
        let value = read_payload(&tag, &mut data)?;
        if data.has_remaining() {
            return Err(VaultError::Encoding(format!(
                "{} trailing bytes after '{}' payload",
                data.remaining(),
                tag_text
            )));
        }
        Ok(value)
    }

    /// Encode as a base64 data URL suitable for text metadata.
    pub fn to_data_url(&self) -> VaultResult<String> {
        let bytes = self.flatten()?;
        Ok(format!(
            "{}{}",
            DATA_URL_PREFIX,
            general_purpose::URL_SAFE.encode(bytes)
        ))
    }

    pub fn from_data_url(text: &str) -> VaultResult<Self> {
        let encoded = text.strip_prefix(DATA_URL_PREFIX).ok_or_else(|| {
            VaultError::Encoding(format!("missing data URL prefix in '{}'", text))
        })?;
        let bytes = general_purpose::URL_SAFE
            .decode(encoded)
            .map_err(|e| VaultError::Encoding(format!("invalid base64: {}", e)))?;
        Self::unflatten(&bytes)
    }
}

fn take(data: &[u8], n: usize) -> VaultResult<()> {
    if data.remaining() < n {
        return Err(VaultError::Encoding(format!(
            "truncated value: need {} bytes, {} left",
            n,
            data.remaining()
        )));
    }
    Ok(())
}

fn read_bytes(data: &mut &[u8]) -> VaultResult<Vec<u8>> {
    take(data, 4)?;
    let len = data.get_u32_le() as usize;
    take(data, len)?;
    let bytes = data[..len].to_vec();
    data.advance(len);
    Ok(bytes)
}

fn read_payload(tag: &Tag, data: &mut &[u8]) -> VaultResult<ParamValue> {
    Ok(match tag {
        Tag::None => ParamValue::None,
        Tag::Bool => {
            take(data, 1)?;
            ParamValue::Bool(data.get_u8() != 0)
        }
        Tag::Int => {
            take(data, 8)?;
            ParamValue::Int(data.get_i64_le())
        }
        Tag::Value(unit) => {
            take(data, 8)?;
            ParamValue::Value(data.get_f64_le(), unit.clone())
        }
        Tag::Complex(unit) => {
            take(data, 16)?;
            let re = data.get_f64_le();
            let im = data.get_f64_le();
            ParamValue::Complex(Complex64::new(re, im), unit.clone())
        }
        Tag::Str => {
            let bytes = read_bytes(data)?;
            ParamValue::Str(
                String::from_utf8(bytes)
                    .map_err(|e| VaultError::Encoding(format!("invalid UTF-8 string: {}", e)))?,
            )
        }
        Tag::Bytes => ParamValue::Bytes(read_bytes(data)?),
        Tag::Time => {
            take(data, 8)?;
            let micros = data.get_i64_le();
            let time = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                VaultError::Encoding(format!("timestamp {} out of range", micros))
            })?;
            ParamValue::Time(time)
        }
        Tag::List(elem) => {
            take(data, 4)?;
            let count = data.get_u32_le() as usize;
            let fits = match elem.min_size() {
                0 => count <= MAX_EMPTY_ITEMS,
                size => count <= data.remaining() / size,
            };
            if !fits {
                return Err(VaultError::Encoding(format!(
                    "list of {} '{}' items does not fit in {} bytes",
                    count,
                    elem,
                    data.remaining()
                )));
            }
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(read_payload(elem, data)?);
            }
            ParamValue::List(items)
        }
        Tag::Cluster(tags) => ParamValue::Cluster(
            tags.iter()
                .map(|t| read_payload(t, data))
                .collect::<VaultResult<_>>()?,
        ),
    })
}
