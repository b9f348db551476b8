//! Completion barrier.
//!
//! Every constructed session registers once and holds a [`BarrierToken`]
//! until it reaches a terminal state. [`CompletionBarrier::wait`] resolves
//! when no tokens are outstanding, which is when the process may exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    outstanding: watch::Sender<usize>,
    registered: AtomicUsize,
    released: AtomicUsize,
}

/// Counts sessions that have not yet finished.
#[derive(Debug, Clone)]
pub struct CompletionBarrier {
    inner: Arc<Inner>,
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionBarrier {
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                outstanding,
                registered: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }),
        }
    }

    /// Count one more session. Dropping the token releases it.
    pub fn register(&self) -> BarrierToken {
        self.inner.registered.fetch_add(1, Ordering::AcqRel);
        self.inner.outstanding.send_modify(|n| *n += 1);
        BarrierToken {
            inner: Arc::clone(&self.inner),
            counted: true,
        }
    }

    /// Keep the barrier closed without registering a session, e.g. while a
    /// batch is still being constructed.
    pub(crate) fn hold(&self) -> BarrierToken {
        self.inner.outstanding.send_modify(|n| *n += 1);
        BarrierToken {
            inner: Arc::clone(&self.inner),
            counted: false,
        }
    }

    /// Resolve once every registered token has been released.
    ///
    /// Resolves immediately when nothing was ever registered.
    pub async fn wait(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.borrow()
    }

    pub fn registered(&self) -> usize {
        self.inner.registered.load(Ordering::Acquire)
    }

    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::Acquire)
    }
}

/// One registered session. Released exactly once, on drop.
#[derive(Debug)]
#[must_use = "dropping the token releases the barrier immediately"]
pub struct BarrierToken {
    inner: Arc<Inner>,
    counted: bool,
}

impl Drop for BarrierToken {
    fn drop(&mut self) {
        if self.counted {
            self.inner.released.fetch_add(1, Ordering::AcqRel);
        }
        self.inner
            .outstanding
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}
