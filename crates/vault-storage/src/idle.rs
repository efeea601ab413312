//! Idle expiry timers.
//!
//! An [`IdleTimer`] runs a callback once a resource has gone unused for a fixed
//! timeout. Every [`IdleTimer::reset`] cancels the pending expiry and schedules
//! a new one, so the callback only fires after a full quiet period.
//!
//! Timers run as tasks on the tokio runtime that was current when the timer was
//! created. Without a runtime nothing ever expires: resources stay live until
//! their owner drops them.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub struct IdleTimer {
    timeout: Duration,
    runtime: Option<Handle>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl IdleTimer {
    pub fn new(timeout: Duration) -> Self {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            tracing::debug!(?timeout, "no tokio runtime; idle expiry disabled");
        }
        Self {
            timeout,
            runtime,
            pending: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cancel any pending expiry and schedule `on_expire` after the timeout.
    pub fn reset<F>(&self, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some(task) = pending.take() {
            task.abort();
        }
        if let Some(runtime) = &self.runtime {
            let timeout = self.timeout;
            *pending = Some(runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                on_expire();
            }));
        }
    }

    pub fn cancel(&self) {
        if let Some(task) = self.pending.lock().take() {
            task.abort();
        }
    }

    /// Whether an expiry is scheduled and has not fired yet.
    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
