//! `vault-storage`
//!
//! On-disk persistence for the data vault.
//!
//! ## Layers
//!
//! - [`idle`]: tokio-driven idle timers
//! - [`managed_file`]: file handles that open lazily and close when idle
//! - [`container`]: the append-only binary container used by the binary formats
//! - [`metadata`]: dataset metadata model and its persistence strategies
//! - [`backend`]: the three dataset formats behind one [`Backend`] type

pub mod backend;
pub mod container;
pub mod idle;
pub mod managed_file;
pub mod metadata;

pub use backend::{Backend, DataBlock, DataPage, Format, StorageSettings};
pub use managed_file::ManagedFile;
pub use metadata::{Comment, DatasetMetadata, MetadataStore, Parameter};
