//! # Data Vault
//!
//! A hierarchical, file-backed store for measurement data that is written
//! incrementally and read while it is still being written.
//!
//! ## Crate Structure
//!
//! - **`vault-core`** (re-exported as [`vault_core`]): paths, column descriptors, row
//!   values, type tags, parameter encoding, and [`VaultError`].
//! - **`vault-storage`** (re-exported as [`vault_storage`]): self-closing file
//!   handles, the binary container, and the three dataset formats.
//! - **`dataset`**: a storage backend plus listener sets for streaming readers.
//! - **`session`**: one directory of the namespace, with its counter and tags.
//! - **`store`**: the process-wide session cache.
//! - **`context`**: a per-client cursor (current directory, dataset, position).
//! - **`listener`**: notification events and sinks.
//! - **`config`** / **`logging`**: Figment configuration and tracing setup.
//!
//! ## Example
//!
//! ```no_run
//! use data_vault::{ListenerId, NullSink, SessionStore, VaultPath, VaultSettings};
//! use data_vault::vault_core::{ColumnValue, Dependent, Independent};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), data_vault::VaultError> {
//! let store = SessionStore::new(VaultSettings::new("vault"), Arc::new(NullSink))?;
//! let session = store.get(&VaultPath::parse("/cooldown"))?;
//! let dataset = session.new_dataset(
//!     "IV curve",
//!     vec![Independent::scalar("Bias", "V")],
//!     vec![Dependent::scalar("Current", "Device A", "nA")],
//!     None,
//! )?;
//! dataset.add_data(&[vec![ColumnValue::F64(0.1), ColumnValue::F64(12.5)]])?;
//! dataset.keep_streaming(ListenerId::new(), 1)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod dataset;
pub mod listener;
pub mod logging;
pub mod session;
pub mod store;

pub use vault_core;
pub use vault_storage;

pub use context::VaultContext;
pub use dataset::Dataset;
pub use listener::{ChannelSink, ListenerId, NotificationSink, NullSink, VaultEvent};
pub use session::{DatasetRef, Session};
pub use store::{SessionStore, VaultSettings};
pub use vault_core::{VaultError, VaultPath, VaultResult};
pub use vault_storage::backend::{DataBlock, DataPage, Format};
