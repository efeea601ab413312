//! CLI Entry Point for the data vault
//!
//! Inspect and tag a vault from the command line:
//!
//! ```bash
//! datavault ls /cooldown --tag star --tag -trash
//! datavault show /cooldown 3
//! datavault dump /cooldown "00003 - IV curve" --start 100 --limit 50
//! datavault tag /cooldown good -bad --dataset 3
//! ```
//!
//! Configuration comes from `datavault.toml` and `DATA_VAULT_*` variables;
//! `--config` and `--root` override them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use data_vault::config::VaultConfig;
use data_vault::{logging, DataBlock, DatasetRef, NullSink, Session, SessionStore, VaultPath};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "datavault")]
#[command(about = "Inspect a hierarchical measurement data vault", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Vault root directory (overrides configuration)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List subdirectories and datasets
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Tag filter; prefix with '-' to exclude
        #[arg(long = "tag", allow_hyphen_values = true)]
        tags: Vec<String>,
    },

    /// Describe one dataset
    Show {
        path: String,
        /// Dataset name or number
        dataset: String,
    },

    /// Print rows as JSON lines
    Dump {
        path: String,
        /// Dataset name or number
        dataset: String,

        #[arg(long, default_value_t = 0)]
        start: u64,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Add ('tag'), remove ('-tag') or toggle ('^tag') tags
    Tag {
        path: String,

        #[arg(required = true, allow_hyphen_values = true)]
        tags: Vec<String>,

        /// Dataset names or numbers to tag
        #[arg(long = "dataset")]
        datasets: Vec<String>,

        /// Subdirectory names to tag
        #[arg(long = "dir")]
        dirs: Vec<String>,
    },
}

fn dataset_ref(text: &str) -> DatasetRef {
    match text.parse::<u64>() {
        Ok(number) => DatasetRef::Number(number),
        Err(_) => DatasetRef::Name(text.to_string()),
    }
}

fn open_session(store: &SessionStore, path: &str) -> Result<Arc<Session>> {
    let path = VaultPath::parse(path);
    if !store.exists(&path) {
        bail!("no such directory: {}", path);
    }
    Ok(store.get(&path)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => VaultConfig::load_from(path),
        None => VaultConfig::load(),
    }
    .context("failed to load configuration")?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    let settings = config.vault_settings().map_err(anyhow::Error::msg)?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let store = SessionStore::new(settings, Arc::new(NullSink))?;
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Ls { path, tags } => {
            let session = open_session(&store, &path)?;
            let (dirs, datasets) = session.list_contents(&tags)?;
            for dir in dirs {
                writeln!(out, "{}/", dir)?;
            }
            for dataset in datasets {
                writeln!(out, "{}", dataset)?;
            }
        }
        Commands::Show { path, dataset } => {
            let session = open_session(&store, &path)?;
            let ds = session.open_dataset(dataset_ref(&dataset))?;
            let [major, minor, patch] = ds.version();
            writeln!(out, "name:      {}", ds.name())?;
            writeln!(out, "title:     {}", ds.title())?;
            writeln!(out, "format:    {} ({}.{}.{})", ds.format(), major, minor, patch)?;
            writeln!(out, "rows:      {}", ds.row_count()?)?;
            writeln!(out, "row type:  {}", ds.row_type())?;
            if let Some(transpose) = ds.transpose_type() {
                writeln!(out, "transpose: {}", transpose)?;
            }
            for col in ds.independents() {
                writeln!(out, "indep:     {} [{}] {}", col.label, col.unit, col.datatype)?;
            }
            for col in ds.dependents() {
                writeln!(
                    out,
                    "dep:       {} ({}) [{}] {}",
                    col.label, col.legend, col.unit, col.datatype
                )?;
            }
            for param in ds.parameters() {
                writeln!(out, "param:     {} = {}", param.name, param.value)?;
            }
            writeln!(out, "comments:  {}", ds.num_comments())?;
        }
        Commands::Dump {
            path,
            dataset,
            start,
            limit,
        } => {
            let session = open_session(&store, &path)?;
            let ds = session.open_dataset(dataset_ref(&dataset))?;
            let page = ds.get_data(limit, start, false, false)?;
            if let DataBlock::Rows(rows) = page.data {
                for row in rows {
                    writeln!(out, "{}", serde_json::to_string(&row)?)?;
                }
            }
            tracing::debug!(next = page.next, "dump finished");
        }
        Commands::Tag {
            path,
            tags,
            datasets,
            dirs,
        } => {
            let session = open_session(&store, &path)?;
            let names = datasets
                .iter()
                .map(|d| -> Result<String> {
                    Ok(session.open_dataset(dataset_ref(d))?.name().to_string())
                })
                .collect::<Result<Vec<_>>>()?;
            let changed = session.update_tags(&tags, &dirs, &names)?;
            if !changed {
                writeln!(out, "no changes")?;
            }
        }
    }

    Ok(())
}
