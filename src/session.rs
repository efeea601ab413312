//! Sessions: one directory of the vault namespace.
//!
//! A [`Session`] owns the directory's metadata file (`session.toml`): the
//! dataset counter, timestamps, and the tags attached to subdirectories and
//! datasets. It creates and opens the [`Dataset`]s stored in the directory and
//! keeps a weak cache of them so that every opener of the same dataset shares
//! one set of listeners.
//!
//! ## Session file
//!
//! ```toml
//! [file_system]
//! counter = 4
//!
//! [information]
//! created = "2024-03-05, 07:08:09"
//! accessed = "2024-03-05, 07:08:09"
//! modified = "2024-03-05, 07:08:09"
//!
//! [tags.sessions]
//! cooldown = ["star"]
//!
//! [tags.datasets]
//! "00001 - IV curve" = ["good", "star"]
//! ```
//!
//! The counter is written back before a new dataset number is handed out, so
//! a number is never reused, even after a crash. The persisted counter is also
//! re-read before each allocation, so several stores opened on the same root
//! keep numbering in step. Tags and timestamps from such stores are
//! last-writer-wins.

use crate::dataset::Dataset;
use crate::listener::{EntryTags, ListenerId, NotificationSink, VaultEvent};
use crate::store::VaultSettings;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use vault_core::path::{decode_segment, encode_segment, DIR_SUFFIX};
use vault_core::{time, Dependent, Independent, VaultError, VaultPath, VaultResult};
use vault_storage::backend::{Backend, Format};

/// Name of the per-directory metadata file.
pub const SESSION_FILE: &str = "session.toml";

type TagMap = BTreeMap<String, BTreeSet<String>>;

/// A dataset reference: full stored name, or the number it was created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetRef {
    Name(String),
    Number(u64),
}

impl From<&str> for DatasetRef {
    fn from(name: &str) -> Self {
        DatasetRef::Name(name.to_string())
    }
}

impl From<u64> for DatasetRef {
    fn from(number: u64) -> Self {
        DatasetRef::Number(number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionFile {
    file_system: FileSystem,
    information: Information,
    #[serde(default)]
    tags: Tags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileSystem {
    counter: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Information {
    #[serde(with = "vault_core::time::text")]
    created: NaiveDateTime,
    #[serde(with = "vault_core::time::text")]
    accessed: NaiveDateTime,
    #[serde(with = "vault_core::time::text")]
    modified: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tags {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    sessions: TagMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    datasets: TagMap,
}

impl SessionFile {
    fn fresh() -> Self {
        let now = time::now();
        Self {
            file_system: FileSystem { counter: 1 },
            information: Information {
                created: now,
                accessed: now,
                modified: now,
            },
            tags: Tags::default(),
        }
    }
}

/// Rewrite tag keys stored as full paths to bare entry names.
///
/// Returns whether anything changed.
fn normalize_tag_keys(tags: &mut TagMap) -> bool {
    let needs_fix = tags.keys().any(|k| k.contains('/') || k.contains('\\'));
    if !needs_fix {
        return false;
    }
    let old = std::mem::take(tags);
    for (key, set) in old {
        let base = key
            .rsplit(|c| c == '/' || c == '\\')
            .find(|s| !s.is_empty())
            .unwrap_or(key.as_str())
            .to_string();
        tags.entry(base).or_default().extend(set);
    }
    true
}

/// Apply `add`, `-remove`, `^toggle` tag operations to one entry's tags.
fn apply_tag_ops(set: &mut BTreeSet<String>, ops: &[String]) -> bool {
    let mut changed = false;
    for op in ops {
        if let Some(tag) = op.strip_prefix('-') {
            changed |= set.remove(tag);
        } else if let Some(tag) = op.strip_prefix('^') {
            if !set.remove(tag) {
                set.insert(tag.to_string());
            }
            changed = true;
        } else {
            changed |= set.insert(op.clone());
        }
    }
    changed
}

/// Whether an entry with `tags` passes every filter. `-tag` means must not have.
fn matches_filters(tags: Option<&BTreeSet<String>>, filters: &[String]) -> bool {
    filters.iter().all(|filter| {
        let has = |tag: &str| tags.is_some_and(|t| t.contains(tag));
        match filter.strip_prefix('-') {
            Some(tag) => !has(tag),
            None => has(filter),
        }
    })
}

fn tags_of(map: &TagMap, entries: &[String]) -> Vec<EntryTags> {
    entries
        .iter()
        .map(|e| {
            let tags: Vec<String> = map.get(e).map(|s| s.iter().cloned().collect()).unwrap_or_default();
            (e.clone(), tags)
        })
        .collect()
}

/// Leading number of a stored dataset name (`"00012 - title"` -> 12).
fn dataset_number(name: &str) -> Option<u64> {
    name.split(" - ").next()?.trim().parse().ok()
}

/// One directory of the vault.
pub struct Session {
    path: VaultPath,
    dir: PathBuf,
    settings: Arc<VaultSettings>,
    sink: Arc<dyn NotificationSink>,
    file: Mutex<SessionFile>,
    datasets: Mutex<HashMap<String, Weak<Dataset>>>,
    listeners: Mutex<HashSet<ListenerId>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Load the session at `path`, creating its directory and metadata if needed.
    pub fn open(
        path: VaultPath,
        settings: Arc<VaultSettings>,
        sink: Arc<dyn NotificationSink>,
    ) -> VaultResult<Self> {
        let dir = path.directory(&settings.root);
        let meta_path = dir.join(SESSION_FILE);

        let file = if meta_path.is_file() {
            let text = fs::read_to_string(&meta_path)?;
            let mut file: SessionFile = toml::from_str(&text)
                .map_err(|e| VaultError::corrupt(&meta_path, e.to_string()))?;
            let migrated = normalize_tag_keys(&mut file.tags.sessions)
                | normalize_tag_keys(&mut file.tags.datasets);
            file.information.accessed = time::now();
            write_session_file(&meta_path, &file)?;
            if migrated {
                tracing::info!(session = %path, "rewrote path-style tag keys as entry names");
            }
            file
        } else {
            fs::create_dir_all(&dir)?;
            let file = SessionFile::fresh();
            write_session_file(&meta_path, &file)?;
            tracing::info!(session = %path, dir = %dir.display(), "created session");
            file
        };

        Ok(Self {
            path,
            dir,
            settings,
            sink,
            file: Mutex::new(file),
            datasets: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashSet::new()),
        })
    }

    pub fn path(&self) -> &VaultPath {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number the next dataset will receive.
    pub fn counter(&self) -> u64 {
        self.file.lock().file_system.counter
    }

    pub fn created(&self) -> NaiveDateTime {
        self.file.lock().information.created
    }

    pub fn accessed(&self) -> NaiveDateTime {
        self.file.lock().information.accessed
    }

    pub fn modified(&self) -> NaiveDateTime {
        self.file.lock().information.modified
    }

    /// Counter as currently stored on disk, or 0 if there is no session file.
    fn persisted_counter(&self) -> VaultResult<u64> {
        let meta_path = self.dir.join(SESSION_FILE);
        let text = match fs::read_to_string(&meta_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let stored: SessionFile =
            toml::from_str(&text).map_err(|e| VaultError::corrupt(&meta_path, e.to_string()))?;
        Ok(stored.file_system.counter)
    }

    fn save(&self, file: &SessionFile) -> VaultResult<()> {
        write_session_file(&self.dir.join(SESSION_FILE), file)
    }

    /// Record an access and persist it.
    pub fn access(&self) -> VaultResult<()> {
        let mut file = self.file.lock();
        file.information.accessed = time::now();
        self.save(&file)
    }

    fn notify_all(&self, event: VaultEvent) {
        let listeners: Vec<ListenerId> = self.listeners.lock().iter().copied().collect();
        for id in listeners {
            self.sink.notify(id, event.clone());
        }
    }

    pub fn add_listener(&self, id: ListenerId) {
        self.listeners.lock().insert(id);
    }

    pub fn remove_listener(&self, id: &ListenerId) -> bool {
        self.listeners.lock().remove(id)
    }

    // -------------------------------------------------------------------------
    // Datasets
    // -------------------------------------------------------------------------

    /// Create a dataset named `NNNNN - title` using `format`, or the vault's
    /// default format when `None`.
    pub fn new_dataset(
        &self,
        title: &str,
        independents: Vec<Independent>,
        dependents: Vec<Dependent>,
        format: Option<Format>,
    ) -> VaultResult<Arc<Dataset>> {
        let number = {
            let mut file = self.file.lock();
            let persisted = self.persisted_counter()?;
            if persisted > file.file_system.counter {
                tracing::debug!(
                    session = %self.path,
                    persisted,
                    "dataset counter advanced on disk"
                );
                file.file_system.counter = persisted;
            }
            let number = file.file_system.counter;
            file.file_system.counter += 1;
            file.information.modified = time::now();
            self.save(&file)?;
            number
        };
        let name = format!("{:05} - {}", number, title);
        let format = format.unwrap_or(self.settings.default_format);

        let backend = Backend::create(
            &self.dir,
            &name,
            format,
            title,
            independents,
            dependents,
            &self.settings.storage,
        )?;
        let dataset = Arc::new(Dataset::new(self.path.clone(), backend, self.sink.clone()));
        self.datasets
            .lock()
            .insert(name.clone(), Arc::downgrade(&dataset));

        self.notify_all(VaultEvent::NewDataset {
            path: self.path.clone(),
            name,
        });
        Ok(dataset)
    }

    /// Open a dataset by name or by number.
    ///
    /// A number resolves through the sorted listing; the first name that
    /// starts with that number wins.
    pub fn open_dataset(&self, which: impl Into<DatasetRef>) -> VaultResult<Arc<Dataset>> {
        let name = match which.into() {
            DatasetRef::Name(name) => name,
            DatasetRef::Number(number) => self
                .list_datasets()?
                .into_iter()
                .find(|n| dataset_number(n) == Some(number))
                .ok_or_else(|| VaultError::DatasetNotFound {
                    name: number.to_string(),
                })?,
        };

        let mut cache = self.datasets.lock();
        cache.retain(|_, weak| weak.strong_count() > 0);
        if let Some(dataset) = cache.get(&name).and_then(Weak::upgrade) {
            return Ok(dataset);
        }

        let backend = Backend::open(&self.dir, &name, &self.settings.storage)?;
        let dataset = Arc::new(Dataset::new(self.path.clone(), backend, self.sink.clone()));
        dataset.access()?;
        cache.insert(name, Arc::downgrade(&dataset));
        Ok(dataset)
    }

    /// Number of datasets currently open through this session.
    pub fn live_datasets(&self) -> usize {
        self.datasets
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn list_datasets(&self) -> VaultResult<Vec<String>> {
        Backend::list(&self.dir)
    }

    /// Sorted names of the subdirectories.
    pub fn list_directories(&self) -> VaultResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(encoded) = file_name.to_str().and_then(|n| n.strip_suffix(DIR_SUFFIX)) else {
                continue;
            };
            match decode_segment(encoded) {
                Ok(name) => names.push(name),
                Err(e) => {
                    tracing::warn!(dir = %entry.path().display(), error = %e, "skipping undecodable directory")
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Subdirectories and datasets, each filtered by `filters`.
    pub fn list_contents(&self, filters: &[String]) -> VaultResult<(Vec<String>, Vec<String>)> {
        let dirs = self.list_directories()?;
        let datasets = self.list_datasets()?;
        let file = self.file.lock();
        let dirs = dirs
            .into_iter()
            .filter(|d| matches_filters(file.tags.sessions.get(d), filters))
            .collect();
        let datasets = datasets
            .into_iter()
            .filter(|d| matches_filters(file.tags.datasets.get(d), filters))
            .collect();
        Ok((dirs, datasets))
    }

    /// Create a subdirectory and return its path.
    pub fn mkdir(&self, name: &str) -> VaultResult<VaultPath> {
        if name.is_empty() {
            return Err(VaultError::EmptyName);
        }
        let dir = self
            .dir
            .join(format!("{}{}", encode_segment(name), DIR_SUFFIX));
        if dir.exists() {
            return Err(VaultError::AlreadyExists {
                name: name.to_string(),
            });
        }
        fs::create_dir(&dir)?;
        let child = self.path.join(name);
        tracing::info!(directory = %child, "created directory");

        self.notify_all(VaultEvent::NewDirectory {
            path: self.path.clone(),
            name: name.to_string(),
        });
        Ok(child)
    }

    // -------------------------------------------------------------------------
    // Tags
    // -------------------------------------------------------------------------

    /// Apply every tag operation to every listed entry.
    ///
    /// `tag` adds, `-tag` removes, `^tag` toggles. Listeners get one
    /// notification, and only if some entry changed.
    pub fn update_tags(
        &self,
        tags: &[String],
        directories: &[String],
        datasets: &[String],
    ) -> VaultResult<bool> {
        let event = {
            let mut file = self.file.lock();
            let mut changed = false;
            for dir in directories {
                changed |= apply_tag_ops(file.tags.sessions.entry(dir.clone()).or_default(), tags);
            }
            for ds in datasets {
                changed |= apply_tag_ops(file.tags.datasets.entry(ds.clone()).or_default(), tags);
            }
            file.tags.sessions.retain(|_, set| !set.is_empty());
            file.tags.datasets.retain(|_, set| !set.is_empty());
            if !changed {
                return Ok(false);
            }
            file.information.modified = time::now();
            self.save(&file)?;
            VaultEvent::TagsUpdated {
                path: self.path.clone(),
                directories: tags_of(&file.tags.sessions, directories),
                datasets: tags_of(&file.tags.datasets, datasets),
            }
        };
        self.notify_all(event);
        Ok(true)
    }

    /// Current tags of the listed entries, in request order.
    pub fn get_tags(
        &self,
        directories: &[String],
        datasets: &[String],
    ) -> (Vec<EntryTags>, Vec<EntryTags>) {
        let file = self.file.lock();
        (
            tags_of(&file.tags.sessions, directories),
            tags_of(&file.tags.datasets, datasets),
        )
    }
}

fn write_session_file(path: &Path, file: &SessionFile) -> VaultResult<()> {
    let text = toml::to_string(file).map_err(|e| VaultError::Metadata(e.to_string()))?;
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ChannelSink;
    use tempfile::tempdir;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tracing_test::traced_test;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn open(root: &Path) -> (Session, UnboundedReceiver<(ListenerId, VaultEvent)>) {
        let settings = Arc::new(VaultSettings::new(root));
        let (sink, rx) = ChannelSink::new();
        (Session::open(VaultPath::root(), settings, Arc::new(sink)).unwrap(), rx)
    }

    fn float_dataset(session: &Session, title: &str) -> Arc<Dataset> {
        session
            .new_dataset(
                title,
                vec![Independent::scalar("x", "")],
                vec![Dependent::scalar("y", "", "")],
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_counter_survives_reload() {
        let root = tempdir().unwrap();
        {
            let (session, _rx) = open(root.path());
            assert_eq!(float_dataset(&session, "a").name(), "00001 - a");
            assert_eq!(float_dataset(&session, "b").name(), "00002 - b");
        }
        let (session, _rx) = open(root.path());
        assert_eq!(session.counter(), 3);
        assert_eq!(float_dataset(&session, "c").name(), "00003 - c");
    }

    #[test]
    fn test_two_sessions_on_one_directory_never_share_a_number() {
        let root = tempdir().unwrap();
        let (first, _rx1) = open(root.path());
        let (second, _rx2) = open(root.path());

        assert_eq!(float_dataset(&first, "a").name(), "00001 - a");
        assert_eq!(float_dataset(&second, "b").name(), "00002 - b");
        assert_eq!(float_dataset(&first, "c").name(), "00003 - c");
        assert_eq!(first.counter(), 4);
        assert_eq!(
            second.list_datasets().unwrap(),
            strings(&["00001 - a", "00002 - b", "00003 - c"])
        );

        let (reloaded, _rx3) = open(root.path());
        assert_eq!(reloaded.counter(), 4);
    }

    #[test]
    fn test_open_by_number_and_shared_instance() {
        let root = tempdir().unwrap();
        let (session, _rx) = open(root.path());
        let created = float_dataset(&session, "first");
        float_dataset(&session, "second");

        let by_number = session.open_dataset(2u64).unwrap();
        assert_eq!(by_number.name(), "00002 - second");
        let by_name = session.open_dataset("00001 - first").unwrap();
        assert!(Arc::ptr_eq(&created, &by_name));
        assert!(matches!(
            session.open_dataset(7u64),
            Err(VaultError::DatasetNotFound { .. })
        ));
    }

    #[test]
    fn test_cache_releases_dropped_datasets() {
        let root = tempdir().unwrap();
        let (session, _rx) = open(root.path());
        let ds = float_dataset(&session, "temp");
        assert_eq!(session.live_datasets(), 1);
        drop(ds);
        assert_eq!(session.live_datasets(), 0);
        assert_eq!(session.open_dataset(1u64).unwrap().title(), "temp");
    }

    #[test]
    fn test_mkdir_rules() {
        let root = tempdir().unwrap();
        let (session, mut rx) = open(root.path());
        let listener = ListenerId::new();
        session.add_listener(listener);

        let child = session.mkdir("a/b: c").unwrap();
        assert_eq!(child, VaultPath::root().join("a/b: c"));
        assert!(matches!(session.mkdir("a/b: c"), Err(VaultError::AlreadyExists { .. })));
        assert!(matches!(session.mkdir(""), Err(VaultError::EmptyName)));
        assert_eq!(session.list_directories().unwrap(), vec!["a/b: c"]);
        assert!(matches!(rx.try_recv(), Ok((_, VaultEvent::NewDirectory { .. }))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tag_updates_notify_once_when_changed() {
        let root = tempdir().unwrap();
        let (session, mut rx) = open(root.path());
        float_dataset(&session, "one");
        float_dataset(&session, "two");
        let listener = ListenerId::new();
        session.add_listener(listener);
        let datasets = strings(&["00001 - one", "00002 - two"]);

        assert!(session.update_tags(&strings(&["old"]), &[], &datasets).unwrap());
        assert_eq!(std::iter::from_fn(|| rx.try_recv().ok()).count(), 1);

        assert!(session
            .update_tags(&strings(&["-old", "new"]), &[], &datasets)
            .unwrap());
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 1);
        let (_, tagged) = session.get_tags(&[], &datasets);
        assert!(tagged.iter().all(|(_, tags)| tags == &vec!["new".to_string()]));

        assert!(!session
            .update_tags(&strings(&["-old", "new"]), &[], &datasets)
            .unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_list_contents_filters() {
        let root = tempdir().unwrap();
        let (session, _rx) = open(root.path());
        float_dataset(&session, "good");
        float_dataset(&session, "bad");
        session.mkdir("sub").unwrap();
        session
            .update_tags(&strings(&["star"]), &strings(&["sub"]), &strings(&["00001 - good"]))
            .unwrap();
        session
            .update_tags(&strings(&["trash"]), &[], &strings(&["00002 - bad"]))
            .unwrap();

        let (dirs, datasets) = session.list_contents(&strings(&["star"])).unwrap();
        assert_eq!(dirs, vec!["sub"]);
        assert_eq!(datasets, vec!["00001 - good"]);

        let (dirs, datasets) = session.list_contents(&strings(&["-trash"])).unwrap();
        assert_eq!(dirs, vec!["sub"]);
        assert_eq!(datasets, vec!["00001 - good"]);

        let (_, datasets) = session.list_contents(&[]).unwrap();
        assert_eq!(datasets.len(), 2);
    }

    #[test]
    fn test_toggle_tag() {
        let mut set = BTreeSet::new();
        assert!(apply_tag_ops(&mut set, &strings(&["^x"])));
        assert!(set.contains("x"));
        assert!(apply_tag_ops(&mut set, &strings(&["^x"])));
        assert!(set.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_path_style_tag_keys_are_migrated() {
        let root = tempdir().unwrap();
        let meta = root.path().join(SESSION_FILE);
        fs::write(
            &meta,
            r#"
[file_system]
counter = 2

[information]
created = "2024-03-05, 07:08:09"
accessed = "2024-03-05, 07:08:09"
modified = "2024-03-05, 07:08:09"

[tags.datasets]
"/data/run/00001 - x" = ["keep"]
"#,
        )
        .unwrap();

        let (session, _rx) = open(root.path());
        let (_, tags) = session.get_tags(&[], &strings(&["00001 - x"]));
        assert_eq!(tags[0].1, vec!["keep".to_string()]);
        assert!(!fs::read_to_string(&meta).unwrap().contains("/data/run"));
        assert!(logs_contain("rewrote path-style tag keys"));
    }
}
