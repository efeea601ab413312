//! Error types for the data vault.
//!
//! Every fallible vault operation returns [`VaultResult`]. The variants fall into
//! three groups:
//!
//! 1. **Namespace errors** - `DatasetNotFound`, `DirectoryNotFound`, `AlreadyExists`,
//!    `EmptyName`. Raised by session and context operations.
//! 2. **Dataset contract errors** - `ReadOnly`, `BadData`, `TypeMismatch`,
//!    `BadParameter`, `ParameterInUse`, `DataVersionMismatch`, `Unsupported`,
//!    `NoDatasetSelected`. Raised before any bytes are written, so a failed call
//!    never leaves a partial write behind.
//! 3. **Storage errors** - `Io`, `Corrupt`, `Metadata`, `Encoding`. Raised when
//!    the on-disk representation cannot be read or written.
//!
//! None of these are retried internally; all surface synchronously to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the vault error type.
pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// Primary error type for the data vault.
#[derive(Error, Debug)]
pub enum VaultError {
    /// A dataset was requested by a name or number that does not exist.
    #[error("Dataset not found: {name}")]
    DatasetNotFound { name: String },

    /// A directory path does not exist and was not created.
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    /// A directory being created already exists.
    #[error("Directory already exists: {name}")]
    AlreadyExists { name: String },

    /// An entry was created with an empty name.
    #[error("Cannot create an entry with an empty name")]
    EmptyName,

    /// A write was attempted on a dataset opened without write intent.
    #[error("Dataset is read-only; open it for appending before adding data")]
    ReadOnly,

    /// A row did not carry one value per column.
    #[error("Bad data: expected {expected} columns, got {got}")]
    BadData { expected: usize, got: usize },

    /// A row value does not fit the fixed record type of its column.
    #[error("Column {column}: expected {expected}, got {got}")]
    TypeMismatch {
        column: usize,
        expected: String,
        got: String,
    },

    /// A parameter lookup failed.
    #[error("Parameter not found: {name}")]
    BadParameter { name: String },

    /// A parameter with this name already exists on the dataset.
    #[error("Parameter already in use: {name}")]
    ParameterInUse { name: String },

    /// A float-only read was requested on a dataset with non-float columns.
    #[error("Column '{column}' has type '{datatype}'; only float64 columns can be read in simple mode")]
    DataVersionMismatch { column: String, datatype: String },

    /// A dataset operation was issued before a dataset was opened or created.
    #[error("No dataset selected")]
    NoDatasetSelected,

    /// The backend does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A type tag, data URL, or encoded filename could not be decoded.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// On-disk metadata could not be serialized or deserialized.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// A file is structurally invalid.
    #[error("Corrupt file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        VaultError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error reports a missing dataset or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VaultError::DatasetNotFound { .. } | VaultError::DirectoryNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Metadata(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = VaultError::BadData {
            expected: 3,
            got: 2,
        };
        assert_eq!(err.to_string(), "Bad data: expected 3 columns, got 2");

        let err = VaultError::ParameterInUse {
            name: "gain".to_string(),
        };
        assert!(err.to_string().contains("gain"));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(VaultError::DatasetNotFound {
            name: "00001 - x".into()
        }
        .is_not_found());
        assert!(!VaultError::EmptyName.is_not_found());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: VaultError = io.into();
        assert!(matches!(err, VaultError::Io(_)));
    }
}
