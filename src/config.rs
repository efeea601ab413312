//! Vault configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `datavault.toml` (base configuration)
//! 2. Environment variables prefixed with `DATA_VAULT_`
//!
//! Every field has a default, so an empty environment and a missing file
//! yield a usable configuration rooted at `./vault`.
//!
//! # Example
//! ```no_run
//! use data_vault::config::VaultConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VaultConfig::load()?;
//! config.validate()?;
//! println!("Vault root: {}", config.root.display());
//! # Ok(())
//! # }
//! ```

use crate::store::VaultSettings;
use figment::{
    providers::{Env, Format as _, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vault_storage::backend::{Format, StorageSettings};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "datavault.toml";

/// Environment variable prefix, e.g. `DATA_VAULT_LOG_LEVEL=debug`.
pub const ENV_PREFIX: &str = "DATA_VAULT_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level vault configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory backing the root of the namespace
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Idle seconds before a dataset file handle is closed
    #[serde(default = "default_timeout")]
    pub file_timeout_secs: u64,
    /// Idle seconds before cached CSV rows are dropped
    #[serde(default = "default_timeout")]
    pub data_cache_timeout_secs: u64,
    /// Format for new datasets (extended, simple, or csv)
    #[serde(default = "default_format")]
    pub default_format: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output (pretty, compact, or json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_root() -> PathBuf {
    PathBuf::from("vault")
}

fn default_timeout() -> u64 {
    60
}

fn default_format() -> String {
    "extended".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            file_timeout_secs: default_timeout(),
            data_cache_timeout_secs: default_timeout(),
            default_format: default_format(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl VaultConfig {
    /// Load configuration from `datavault.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !VALID_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LEVELS.join(", ")
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.log_format,
                VALID_LOG_FORMATS.join(", ")
            ));
        }

        self.format()?;

        if self.file_timeout_secs == 0 {
            return Err("file_timeout_secs must be greater than zero".to_string());
        }
        if self.data_cache_timeout_secs == 0 {
            return Err("data_cache_timeout_secs must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Parsed `default_format`.
    pub fn format(&self) -> Result<Format, String> {
        self.default_format.parse::<Format>().map_err(|_| {
            format!(
                "Invalid default_format '{}'. Must be one of: extended, simple, csv",
                self.default_format
            )
        })
    }

    /// Settings for a [`crate::store::SessionStore`].
    pub fn vault_settings(&self) -> Result<VaultSettings, String> {
        self.validate()?;
        Ok(VaultSettings {
            root: self.root.clone(),
            storage: StorageSettings {
                file_timeout: Duration::from_secs(self.file_timeout_secs),
                data_cache_timeout: Duration::from_secs(self.data_cache_timeout_secs),
            },
            default_format: self.format()?,
        })
    }
}
