//! Cooperative stop token for clean shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A clonable async cancellation flag.
///
/// Clones share state: cancelling any clone wakes every waiter.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    stopping: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown to all waiters.
    pub fn cancel(&self) {
        self.inner.stopping.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn cancelled(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    /// Resolve once cancellation is signalled; immediately if it already
    /// was.
    pub async fn wait(&self) {
        while !self.cancelled() {
            self.inner.notify.notified().await;
        }
    }
}
