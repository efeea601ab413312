//! Per-client cursor over the vault.
//!
//! A [`VaultContext`] carries what a connected client has selected: the
//! current directory, the current dataset, whether the client may write to
//! it, and how far it has read. Several contexts over one [`SessionStore`] are
//! independent, and several stores can coexist in one process.

use crate::dataset::Dataset;
use crate::listener::{EntryTags, ListenerId};
use crate::session::{DatasetRef, Session};
use crate::store::SessionStore;
use std::sync::Arc;
use vault_core::{Dependent, Independent, ParamValue, Row, VaultError, VaultPath, VaultResult};
use vault_storage::backend::{DataPage, Format};
use vault_storage::metadata::{Comment, Parameter};

pub struct VaultContext {
    id: ListenerId,
    store: Arc<SessionStore>,
    session: Arc<Session>,
    dataset: Option<Arc<Dataset>>,
    writing: bool,
    data_pos: u64,
    comment_pos: usize,
}

impl VaultContext {
    /// A context positioned at the root directory.
    pub fn new(store: Arc<SessionStore>) -> VaultResult<Self> {
        let id = ListenerId::new();
        let session = store.get(&VaultPath::root())?;
        session.add_listener(id);
        Ok(Self {
            id,
            store,
            session,
            dataset: None,
            writing: false,
            data_pos: 0,
            comment_pos: 0,
        })
    }

    /// Identity used for this context's notifications.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn path(&self) -> &VaultPath {
        self.session.path()
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }

    fn release_dataset(&mut self) {
        if let Some(dataset) = self.dataset.take() {
            dataset.remove_listener(&self.id);
        }
        self.writing = false;
        self.data_pos = 0;
        self.comment_pos = 0;
    }

    fn select(&mut self, dataset: Arc<Dataset>, writing: bool) -> (VaultPath, String) {
        self.release_dataset();
        let selected = (dataset.path().clone(), dataset.name().to_string());
        self.dataset = Some(dataset);
        self.writing = writing;
        selected
    }

    /// Change directory.
    ///
    /// `target` is `/`-separated; a leading `/` starts from the root and `..`
    /// steps up. With `create`, missing directories are made on the way;
    /// otherwise a missing directory is an error and nothing changes.
    pub fn cd(&mut self, target: &str, create: bool) -> VaultResult<VaultPath> {
        let mut path = if target.starts_with('/') {
            VaultPath::root()
        } else {
            self.path().clone()
        };
        for segment in target.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                path = path.parent().unwrap_or_else(VaultPath::root);
                continue;
            }
            let next = path.join(segment);
            if !self.store.exists(&next) {
                if !create {
                    return Err(VaultError::DirectoryNotFound {
                        path: next.to_string(),
                    });
                }
                self.store.get(&path)?.mkdir(segment)?;
            }
            path = next;
        }

        let session = self.store.get(&path)?;
        self.session.remove_listener(&self.id);
        session.add_listener(self.id);
        self.session = session;
        self.release_dataset();
        Ok(path)
    }

    pub fn mkdir(&self, name: &str) -> VaultResult<VaultPath> {
        self.session.mkdir(name)
    }

    /// Subdirectories and datasets of the current directory, filtered by tag.
    pub fn dir(&self, filters: &[String]) -> VaultResult<(Vec<String>, Vec<String>)> {
        self.session.list_contents(filters)
    }

    /// Create a dataset in the current directory and select it for writing.
    pub fn new_dataset(
        &mut self,
        title: &str,
        independents: Vec<Independent>,
        dependents: Vec<Dependent>,
        format: Option<Format>,
    ) -> VaultResult<(VaultPath, String)> {
        let dataset = self
            .session
            .new_dataset(title, independents, dependents, format)?;
        Ok(self.select(dataset, true))
    }

    /// Select an existing dataset read-only.
    pub fn open(&mut self, which: impl Into<DatasetRef>) -> VaultResult<(VaultPath, String)> {
        let dataset = self.session.open_dataset(which)?;
        Ok(self.select(dataset, false))
    }

    /// Select an existing dataset and allow appending to it.
    pub fn open_appendable(
        &mut self,
        which: impl Into<DatasetRef>,
    ) -> VaultResult<(VaultPath, String)> {
        let dataset = self.session.open_dataset(which)?;
        Ok(self.select(dataset, true))
    }

    pub fn current_dataset(&self) -> VaultResult<&Arc<Dataset>> {
        self.dataset.as_ref().ok_or(VaultError::NoDatasetSelected)
    }

    pub fn add(&self, rows: &[Row]) -> VaultResult<()> {
        let dataset = self.current_dataset()?;
        if !self.writing {
            return Err(VaultError::ReadOnly);
        }
        dataset.add_data(rows)
    }

    /// Read rows and advance this context's cursor.
    ///
    /// `start` of `None` continues from where the last read stopped. After the
    /// read the context is registered for the next data notification.
    pub fn get(
        &mut self,
        limit: Option<usize>,
        start: Option<u64>,
        transpose: bool,
        simple_only: bool,
    ) -> VaultResult<DataPage> {
        let dataset = self.current_dataset()?.clone();
        let start = start.unwrap_or(self.data_pos);
        let page = dataset.get_data(limit, start, transpose, simple_only)?;
        self.data_pos = page.next;
        dataset.keep_streaming(self.id, page.next)?;
        Ok(page)
    }

    pub fn add_parameter(&self, name: &str, value: ParamValue) -> VaultResult<()> {
        self.current_dataset()?.add_parameter(name, value)
    }

    pub fn add_parameters(&self, params: Vec<(String, ParamValue)>) -> VaultResult<()> {
        self.current_dataset()?.add_parameters(params)
    }

    pub fn get_parameter(&self, name: &str, case_sensitive: bool) -> VaultResult<ParamValue> {
        self.current_dataset()?.get_parameter(name, case_sensitive)
    }

    /// All parameters; registers for the next parameter notification.
    pub fn parameters(&self) -> VaultResult<Vec<Parameter>> {
        let dataset = self.current_dataset()?;
        let params = dataset.parameters();
        dataset.watch_parameters(self.id, params.len());
        Ok(params)
    }

    pub fn add_comment(&self, user: &str, text: &str) -> VaultResult<()> {
        self.current_dataset()?.add_comment(user, text)
    }

    /// Read comments and advance this context's comment cursor.
    pub fn get_comments(
        &mut self,
        limit: Option<usize>,
        start: Option<usize>,
    ) -> VaultResult<Vec<Comment>> {
        let dataset = self.current_dataset()?.clone();
        let start = start.unwrap_or(self.comment_pos);
        let (comments, next) = dataset.get_comments(limit, start);
        self.comment_pos = next;
        dataset.keep_streaming_comments(self.id, next);
        Ok(comments)
    }

    pub fn update_tags(
        &self,
        tags: &[String],
        directories: &[String],
        datasets: &[String],
    ) -> VaultResult<bool> {
        self.session.update_tags(tags, directories, datasets)
    }

    pub fn get_tags(
        &self,
        directories: &[String],
        datasets: &[String],
    ) -> (Vec<EntryTags>, Vec<EntryTags>) {
        self.session.get_tags(directories, datasets)
    }
}

impl Drop for VaultContext {
    fn drop(&mut self) {
        self.release_dataset();
        self.session.remove_listener(&self.id);
    }
}
