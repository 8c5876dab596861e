//! Serializes the public entrypoints of one task executor instance.
//!
//! Exactly one attempt runs at a time; concurrent callers queue in FIFO
//! arrival order (tokio's mutex is fair). The mutex never drops a queued
//! operation — cancelling a queued operation is that operation's own
//! responsibility.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct LifecycleMutex {
    inner: Mutex<()>,
    locked: AtomicBool,
}

/// Resets the observation flag even when the operation unwinds.
struct LockedFlag<'a>(&'a AtomicBool);

impl Drop for LockedFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl LifecycleMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` with the lifecycle lock held. Returns the operation's own
    /// result or error; callers queued behind a throwing operation still run.
    pub async fn run_exclusive<T, F, Fut>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.inner.lock().await;
        self.locked.store(true, Ordering::SeqCst);
        let _flag = LockedFlag(&self.locked);
        op().await
    }

    /// Observation-only: whether an operation currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}
