//! `vault-core`
//!
//! Shared types for the data vault: namespace paths, column descriptors, the
//! typed row value model, the binary record layout, type descriptor strings,
//! parameter value encoding, and the error taxonomy.
//!
//! ## Key Types
//!
//! - [`VaultPath`]: a node in the hierarchical namespace
//! - [`Independent`] / [`Dependent`]: column descriptors, fixed at dataset creation
//! - [`ColumnValue`] / [`Row`]: tagged row values
//! - [`RecordLayout`]: fixed record dtype used by binary backends
//! - [`ParamValue`]: self-describing parameter values
//! - [`VaultError`]: error type shared by every crate in the workspace

pub mod column;
pub mod error;
pub mod param;
pub mod path;
pub mod record;
pub mod time;
pub mod type_tag;

pub use column::{ColumnRef, ColumnValue, DataType, Dependent, Independent, Row, Shape};
pub use error::{VaultError, VaultResult};
pub use param::ParamValue;
pub use path::VaultPath;
pub use record::RecordLayout;

/// Timestamp format used in all text metadata (`YYYY-MM-DD, HH:MM:SS`).
pub const TIME_FORMAT: &str = "%Y-%m-%d, %H:%M:%S";
