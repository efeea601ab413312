//! Process-wide session cache.

use crate::listener::NotificationSink;
use crate::session::Session;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use vault_core::{VaultPath, VaultResult};
use vault_storage::backend::{Format, StorageSettings};

/// Settings shared by every session of one vault.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultSettings {
    /// Directory backing the root path.
    pub root: PathBuf,
    pub storage: StorageSettings,
    /// Format used when a dataset is created without an explicit one.
    pub default_format: Format,
}

impl VaultSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            storage: StorageSettings::default(),
            default_format: Format::Extended,
        }
    }
}

/// Hands out one [`Session`] per path.
///
/// Sessions are held weakly: once the last caller drops its `Arc`, the session
/// and the datasets it cached are released. Dead entries are swept on every
/// [`SessionStore::get`] and by [`SessionStore::purge`].
pub struct SessionStore {
    settings: Arc<VaultSettings>,
    sink: Arc<dyn NotificationSink>,
    sessions: Mutex<HashMap<VaultPath, Weak<Session>>>,
}

impl SessionStore {
    pub fn new(settings: VaultSettings, sink: Arc<dyn NotificationSink>) -> VaultResult<Self> {
        std::fs::create_dir_all(&settings.root)?;
        tracing::debug!(root = %settings.root.display(), "opened vault");
        Ok(Self {
            settings: Arc::new(settings),
            sink,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    /// The live session for `path`, loading or creating it if necessary.
    pub fn get(&self, path: &VaultPath) -> VaultResult<Arc<Session>> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(path).and_then(Weak::upgrade) {
            return Ok(session);
        }
        sessions.retain(|_, weak| weak.strong_count() > 0);

        let session = Arc::new(Session::open(
            path.clone(),
            self.settings.clone(),
            self.sink.clone(),
        )?);
        sessions.insert(path.clone(), Arc::downgrade(&session));
        Ok(session)
    }

    /// Whether `path` has a directory on disk. Independent of the cache.
    pub fn exists(&self, path: &VaultPath) -> bool {
        path.directory(&self.settings.root).is_dir()
    }

    /// Paths whose sessions are currently alive.
    pub fn live_sessions(&self) -> Vec<VaultPath> {
        let mut live: Vec<VaultPath> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(path, _)| path.clone())
            .collect();
        live.sort();
        live
    }

    /// Drop cache entries whose sessions have been released. Returns how many.
    pub fn purge(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, weak| weak.strong_count() > 0);
        before - sessions.len()
    }
}
