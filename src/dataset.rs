//! Datasets: a [`Backend`] plus the listener sets that make streaming work.
//!
//! One `Dataset` object exists per open dataset per session, shared by every
//! reader and writer through `Arc`, so a write wakes readers attached through
//! any handle. Notifications are sent after the locks are released but before
//! the writing call returns.
//!
//! Lock order is always backend, then listeners. Writers drain a listener set
//! and readers decide admission while still holding the backend guard, so a
//! reader that saw no new rows is registered before the next write can drain.

use crate::listener::{ListenerId, ListenerSet, NotificationSink, VaultEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use vault_core::{Dependent, Independent, ParamValue, Row, VaultPath, VaultResult};
use vault_storage::backend::{Backend, DataPage, Format};
use vault_storage::metadata::{Comment, Parameter};

#[derive(Default)]
struct Listeners {
    data: ListenerSet,
    parameters: ListenerSet,
    comments: ListenerSet,
}

pub struct Dataset {
    path: VaultPath,
    name: String,
    backend: Mutex<Backend>,
    listeners: Mutex<Listeners>,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Dataset {
    pub fn new(path: VaultPath, backend: Backend, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            path,
            name: backend.name().to_string(),
            backend: Mutex::new(backend),
            listeners: Mutex::new(Listeners::default()),
            sink,
        }
    }

    /// Path of the session holding this dataset.
    pub fn path(&self) -> &VaultPath {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn event(&self, make: fn(VaultPath, String) -> VaultEvent) -> VaultEvent {
        make(self.path.clone(), self.name.clone())
    }

    fn fan_out(&self, waiting: Vec<ListenerId>, make: fn(VaultPath, String) -> VaultEvent) {
        for id in waiting {
            self.sink.notify(id, self.event(make));
        }
    }

    // -------------------------------------------------------------------------
    // Rows
    // -------------------------------------------------------------------------

    /// Append rows, then wake every caught-up data listener once.
    pub fn add_data(&self, rows: &[Row]) -> VaultResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let waiting = {
            let mut backend = self.backend.lock();
            backend.add_data(rows)?;
            self.listeners.lock().data.drain()
        };
        self.fan_out(waiting, data_available);
        Ok(())
    }

    pub fn get_data(
        &self,
        limit: Option<usize>,
        start: u64,
        transpose: bool,
        simple_only: bool,
    ) -> VaultResult<DataPage> {
        self.backend.lock().get_data(limit, start, transpose, simple_only)
    }

    /// Ask to be woken when rows past `pos` exist.
    ///
    /// If they already do, the listener is notified immediately instead.
    pub fn keep_streaming(&self, listener: ListenerId, pos: u64) -> VaultResult<()> {
        let notify_now = {
            let backend = self.backend.lock();
            let has_more = backend.has_more(pos)?;
            self.listeners.lock().data.admit(listener, has_more)
        };
        if notify_now {
            self.sink.notify(listener, self.event(data_available));
        }
        Ok(())
    }

    pub fn row_count(&self) -> VaultResult<u64> {
        self.backend.lock().row_count()
    }

    // -------------------------------------------------------------------------
    // Parameters
    // -------------------------------------------------------------------------

    pub fn add_parameter(&self, name: &str, value: ParamValue) -> VaultResult<()> {
        self.add_parameters(vec![(name.to_string(), value)])
    }

    /// Add several parameters with one notification. A duplicate name rejects
    /// the whole batch.
    pub fn add_parameters(&self, params: Vec<(String, ParamValue)>) -> VaultResult<()> {
        let waiting = {
            let mut backend = self.backend.lock();
            backend.add_params(params)?;
            self.listeners.lock().parameters.drain()
        };
        self.fan_out(waiting, new_parameter);
        Ok(())
    }

    pub fn get_parameter(&self, name: &str, case_sensitive: bool) -> VaultResult<ParamValue> {
        self.backend.lock().get_parameter(name, case_sensitive)
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.backend.lock().param_names()
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        self.backend.lock().parameters().to_vec()
    }

    /// Ask to be woken when more than `seen` parameters exist.
    pub fn watch_parameters(&self, listener: ListenerId, seen: usize) {
        let notify_now = {
            let backend = self.backend.lock();
            let has_more = backend.num_params() > seen;
            self.listeners.lock().parameters.admit(listener, has_more)
        };
        if notify_now {
            self.sink.notify(listener, self.event(new_parameter));
        }
    }

    // -------------------------------------------------------------------------
    // Comments
    // -------------------------------------------------------------------------

    pub fn add_comment(&self, user: &str, text: &str) -> VaultResult<()> {
        let waiting = {
            let mut backend = self.backend.lock();
            backend.add_comment(user, text)?;
            self.listeners.lock().comments.drain()
        };
        self.fan_out(waiting, comments_available);
        Ok(())
    }

    /// Up to `limit` comments from `start`, plus the position to resume from.
    pub fn get_comments(&self, limit: Option<usize>, start: usize) -> (Vec<Comment>, usize) {
        self.backend.lock().get_comments(limit, start)
    }

    pub fn keep_streaming_comments(&self, listener: ListenerId, pos: usize) {
        let notify_now = {
            let backend = self.backend.lock();
            let has_more = backend.num_comments() > pos;
            self.listeners.lock().comments.admit(listener, has_more)
        };
        if notify_now {
            self.sink.notify(listener, self.event(comments_available));
        }
    }

    pub fn num_comments(&self) -> usize {
        self.backend.lock().num_comments()
    }

    // -------------------------------------------------------------------------
    // Description
    // -------------------------------------------------------------------------

    pub fn row_type(&self) -> String {
        self.backend.lock().row_type()
    }

    pub fn transpose_type(&self) -> Option<String> {
        self.backend.lock().transpose_type()
    }

    pub fn independents(&self) -> Vec<Independent> {
        self.backend.lock().independents().to_vec()
    }

    pub fn dependents(&self) -> Vec<Dependent> {
        self.backend.lock().dependents().to_vec()
    }

    pub fn version(&self) -> [u32; 3] {
        self.backend.lock().version()
    }

    pub fn format(&self) -> Format {
        self.backend.lock().format()
    }

    pub fn title(&self) -> String {
        self.backend.lock().title().to_string()
    }

    /// Drop `listener` from every wait set.
    pub fn remove_listener(&self, listener: &ListenerId) {
        let mut listeners = self.listeners.lock();
        listeners.data.remove(listener);
        listeners.parameters.remove(listener);
        listeners.comments.remove(listener);
    }

    /// Record an access on disk.
    pub fn access(&self) -> VaultResult<()> {
        self.backend.lock().access()
    }
}

fn data_available(path: VaultPath, dataset: String) -> VaultEvent {
    VaultEvent::DataAvailable { path, dataset }
}

fn new_parameter(path: VaultPath, dataset: String) -> VaultEvent {
    VaultEvent::NewParameter { path, dataset }
}

fn comments_available(path: VaultPath, dataset: String) -> VaultEvent {
    VaultEvent::CommentsAvailable { path, dataset }
}
