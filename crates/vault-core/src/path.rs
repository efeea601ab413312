//! Namespace paths and their mapping onto directories.
//!
//! A [`VaultPath`] is an ordered list of segments whose first element is the
//! empty string (the root). Each non-root segment becomes one directory level
//! named `<encoded segment>.dir`, where the encoding escapes every character
//! that is unsafe in filenames on common platforms.

use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffix appended to encoded directory names on disk.
pub const DIR_SUFFIX: &str = ".dir";

const ESCAPE: char = '%';

/// (reserved character, escape code) pairs.
const ENCODINGS: [(char, char); 10] = [
    ('%', 'p'),
    ('/', 'f'),
    ('\\', 'b'),
    (':', 'c'),
    ('*', 'a'),
    ('?', 'q'),
    ('"', 'Q'),
    ('<', 'l'),
    ('>', 'g'),
    ('|', 'P'),
];

/// Encode one path segment so it can be used as a filename.
pub fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for ch in segment.chars() {
        match ENCODINGS.iter().find(|(reserved, _)| *reserved == ch) {
            Some((_, code)) => {
                out.push(ESCAPE);
                out.push(*code);
            }
            None => out.push(ch),
        }
    }
    out
}

/// Inverse of [`encode_segment`].
pub fn decode_segment(encoded: &str) -> VaultResult<String> {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(ch) = chars.next() {
        if ch != ESCAPE {
            out.push(ch);
            continue;
        }
        let code = chars
            .next()
            .ok_or_else(|| VaultError::Encoding(format!("dangling escape in '{}'", encoded)))?;
        let (reserved, _) = ENCODINGS
            .iter()
            .find(|(_, c)| *c == code)
            .ok_or_else(|| {
                VaultError::Encoding(format!("unknown escape '%{}' in '{}'", code, encoded))
            })?;
        out.push(*reserved);
    }
    Ok(out)
}

/// A node in the vault namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VaultPath(Vec<String>);

impl VaultPath {
    pub fn root() -> Self {
        VaultPath(vec![String::new()])
    }

    /// Build a path from segments below the root.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root();
        path.0.extend(segments.into_iter().map(Into::into));
        path
    }

    /// Parse a slash-separated path such as `/run1/cooldown`.
    ///
    /// Empty segments are skipped, so `""`, `"/"` and `"//"` all denote the root.
    pub fn parse(text: &str) -> Self {
        Self::from_segments(text.split('/').filter(|s| !s.is_empty()))
    }

    pub fn join(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.0.push(name.into());
        next
    }

    /// The parent path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut parent = self.clone();
        parent.0.pop();
        Some(parent)
    }

    pub fn is_root(&self) -> bool {
        self.0.len() <= 1
    }

    /// Segments below the root.
    pub fn segments(&self) -> &[String] {
        &self.0[1.min(self.0.len())..]
    }

    /// Last segment, or the empty string at the root.
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    /// The full segment list including the leading root marker.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Directory backing this path under `root_dir`.
    pub fn directory(&self, root_dir: &Path) -> PathBuf {
        let mut dir = root_dir.to_path_buf();
        for segment in self.segments() {
            dir.push(format!("{}{}", encode_segment(segment), DIR_SUFFIX));
        }
        dir
    }
}

impl Default for VaultPath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for segment in self.segments() {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_round_trip_reserved_characters() {
        let segment = r#"a%b/c\d:e*f?g"h<i>j|k"#;
        let encoded = encode_segment(segment);
        for reserved in ['/', '\\', ':', '*', '?', '"', '<', '>', '|'] {
            assert!(!encoded.contains(reserved), "{} leaked into {}", reserved, encoded);
        }
        assert_eq!(decode_segment(&encoded).unwrap(), segment);
    }

    #[test]
    fn test_escape_character_is_escaped() {
        assert_eq!(encode_segment("50%"), "50%p");
        assert_eq!(decode_segment("%p%f").unwrap(), "%/");
    }

    #[test]
    fn test_decode_rejects_unknown_escape() {
        assert!(matches!(
            decode_segment("bad%z"),
            Err(VaultError::Encoding(_))
        ));
        assert!(decode_segment("trailing%").is_err());
    }

    #[test]
    fn test_path_navigation() {
        let path = VaultPath::parse("/run1/cooldown");
        assert_eq!(path.segments(), &["run1".to_string(), "cooldown".to_string()]);
        assert_eq!(path.name(), "cooldown");
        assert_eq!(path.to_string(), "/run1/cooldown");
        assert_eq!(path.parent().unwrap(), VaultPath::parse("run1"));
        assert!(VaultPath::parse("/").is_root());
        assert!(VaultPath::root().parent().is_none());
        assert_eq!(VaultPath::root().to_string(), "/");
    }

    #[test]
    fn test_directory_mapping() {
        let path = VaultPath::from_segments(["a/b", "c"]);
        let dir = path.directory(Path::new("/vault"));
        assert_eq!(dir, PathBuf::from("/vault/a%fb.dir/c.dir"));
        assert_eq!(VaultPath::root().directory(Path::new("/vault")), PathBuf::from("/vault"));
    }
}
