//! Second-resolution local timestamps as stored in text metadata.

use crate::error::{VaultError, VaultResult};
use crate::TIME_FORMAT;
use chrono::{Local, NaiveDateTime, Timelike};

/// Current local time truncated to whole seconds, so it survives a text round trip.
pub fn now() -> NaiveDateTime {
    let t = Local::now().naive_local();
    t.with_nanosecond(0).unwrap_or(t)
}

pub fn format(t: &NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

pub fn parse(text: &str) -> VaultResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), TIME_FORMAT)
        .map_err(|e| VaultError::Metadata(format!("bad timestamp '{}': {}", text, e)))
}

/// `#[serde(with = "vault_core::time::text")]` adapter.
pub mod text {
    use chrono::NaiveDateTime;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(d)?;
        super::parse(&text).map_err(D::Error::custom)
    }
}
