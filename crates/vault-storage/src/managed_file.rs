//! Lazily opened, self-closing file handles.
//!
//! Datasets may be referenced from many places for a long time while being
//! touched rarely. A [`ManagedFile`] keeps the open-arguments instead of the
//! descriptor: the file is opened on the first [`ManagedFile::acquire`], and
//! closed again once it has not been acquired for the idle timeout. The next
//! acquire reopens it transparently.
//!
//! # Close callbacks
//!
//! Callbacks registered with [`ManagedFile::on_close`] run with the file just
//! before it is released, whether by idle expiry, [`ManagedFile::close`], or
//! drop. They run while the handle's state lock is held and must not acquire
//! the same handle. Callback failures are logged and otherwise ignored.

use crate::idle::IdleTimer;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

type CloseCallback = Box<dyn Fn(&File) -> io::Result<()> + Send + Sync>;

struct HandleState {
    file: Option<Arc<File>>,
    /// Bumped on every acquire; a timer only closes the generation it was armed for.
    generation: u64,
    opens: u64,
}

struct Shared {
    path: PathBuf,
    options: OpenOptions,
    state: Mutex<HandleState>,
    callbacks: Mutex<Vec<CloseCallback>>,
}

impl Shared {
    fn expire(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        self.release(&mut state);
    }

    fn release(&self, state: &mut HandleState) {
        let Some(file) = state.file.take() else {
            return;
        };
        for callback in self.callbacks.lock().iter() {
            if let Err(e) = callback(&file) {
                tracing::warn!(path = %self.path.display(), error = %e, "close callback failed");
            }
        }
        tracing::debug!(path = %self.path.display(), "closed file handle");
    }
}

/// Fill `buf` from `offset` without moving the shared cursor.
pub fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
    }
    #[cfg(windows)]
    {
        let mut filled = 0;
        while filled < buf.len() {
            let n = std::os::windows::fs::FileExt::seek_read(
                file,
                &mut buf[filled..],
                offset + filled as u64,
            )?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(())
    }
}

/// Append `bytes` to a file opened for appending. If the write fails part way
/// the file is cut back to its previous length, so no torn record is left.
pub fn append_all(file: &File, bytes: &[u8]) -> io::Result<()> {
    let start = file.metadata()?.len();
    let mut writer = file;
    if let Err(e) = writer.write_all(bytes) {
        if let Err(trunc) = file.set_len(start) {
            tracing::error!(error = %trunc, "failed to roll back partial append");
        }
        return Err(e);
    }
    Ok(())
}

/// A file handle that opens on demand and closes itself when idle.
pub struct ManagedFile {
    shared: Arc<Shared>,
    timer: IdleTimer,
}

impl ManagedFile {
    pub fn new(path: impl Into<PathBuf>, options: OpenOptions, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                options,
                state: Mutex::new(HandleState {
                    file: None,
                    generation: 0,
                    opens: 0,
                }),
                callbacks: Mutex::new(Vec::new()),
            }),
            timer: IdleTimer::new(timeout),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Return the live file, opening it if needed, and restart the idle timer.
    ///
    /// Open failures propagate unchanged; there is no retry.
    pub fn acquire(&self) -> io::Result<Arc<File>> {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        let file = match &state.file {
            Some(file) => file.clone(),
            None => {
                let file = Arc::new(self.shared.options.open(&self.shared.path)?);
                state.opens += 1;
                state.file = Some(file.clone());
                tracing::debug!(path = %self.shared.path.display(), "opened file handle");
                file
            }
        };
        let generation = state.generation;

        // Armed under the state lock so the newest generation always owns the timer.
        let shared = Arc::downgrade(&self.shared);
        self.timer.reset(move || {
            if let Some(shared) = shared.upgrade() {
                shared.expire(generation);
            }
        });
        Ok(file)
    }

    /// Current on-disk size. Acquires the handle internally.
    pub fn size(&self) -> io::Result<u64> {
        Ok(self.acquire()?.metadata()?.len())
    }

    /// Register a callback to run with the file just before it is closed.
    pub fn on_close<F>(&self, callback: F)
    where
        F: Fn(&File) -> io::Result<()> + Send + Sync + 'static,
    {
        self.shared.callbacks.lock().push(Box::new(callback));
    }

    /// Close now, running close callbacks. The next acquire reopens.
    pub fn close(&self) {
        self.timer.cancel();
        let mut state = self.shared.state.lock();
        self.shared.release(&mut state);
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().file.is_some()
    }

    /// How many times the underlying file has been opened.
    pub fn open_count(&self) -> u64 {
        self.shared.state.lock().opens
    }
}

impl Drop for ManagedFile {
    fn drop(&mut self) {
        self.close();
    }
}
