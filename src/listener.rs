//! Change notification.
//!
//! Readers register interest by reading to the end of what is currently
//! available; writers wake everyone registered. A [`ListenerSet`] implements the
//! per-dataset half of that protocol and a [`NotificationSink`] carries the
//! resulting events out of the vault (to an RPC layer, a channel, or nowhere).
//!
//! ```text
//!                 read, nothing unseen
//!   (not listed) ----------------------> caught-up
//!        ^   ^                               |
//!        |   |  read, unseen rows:           |  write:
//!        |   +-- notify now, remove ---------+  notify once, clear the set
//!        +-------------------------------------+
//! ```
//!
//! A listener that misses several writes gets one notification, not one per
//! write: work is proportional to how often it asks to be woken.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;
use vault_core::VaultPath;

/// Opaque subscriber identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tags currently attached to one entry.
pub type EntryTags = (String, Vec<String>);

/// Events delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VaultEvent {
    NewDataset {
        path: VaultPath,
        name: String,
    },
    NewDirectory {
        path: VaultPath,
        name: String,
    },
    TagsUpdated {
        path: VaultPath,
        directories: Vec<EntryTags>,
        datasets: Vec<EntryTags>,
    },
    DataAvailable {
        path: VaultPath,
        dataset: String,
    },
    NewParameter {
        path: VaultPath,
        dataset: String,
    },
    CommentsAvailable {
        path: VaultPath,
        dataset: String,
    },
}

/// Destination for notifications. Called synchronously from the writing call.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, listener: ListenerId, event: VaultEvent);
}

/// Forwards notifications into an unbounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(ListenerId, VaultEvent)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(ListenerId, VaultEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, listener: ListenerId, event: VaultEvent) {
        if self.tx.send((listener, event)).is_err() {
            tracing::debug!(%listener, "notification receiver dropped");
        }
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _listener: ListenerId, _event: VaultEvent) {}
}

/// Listeners waiting for the next write of one kind.
#[derive(Debug, Default)]
pub struct ListenerSet {
    waiting: HashSet<ListenerId>,
}

impl ListenerSet {
    /// Register `id` after a read. Returns `true` if it must be notified now
    /// because unseen data already exists; it is then removed from the set.
    pub fn admit(&mut self, id: ListenerId, has_more: bool) -> bool {
        if has_more {
            self.waiting.remove(&id);
            true
        } else {
            self.waiting.insert(id);
            false
        }
    }

    /// Take every waiting listener, leaving the set empty.
    pub fn drain(&mut self) -> Vec<ListenerId> {
        self.waiting.drain().collect()
    }

    pub fn remove(&mut self, id: &ListenerId) -> bool {
        self.waiting.remove(id)
    }

    pub fn contains(&self, id: &ListenerId) -> bool {
        self.waiting.contains(id)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
