//! Completion barrier used by shutdown to wait for in-flight work.

use tokio::sync::watch;
use tracing::warn;

/// Counter of outstanding work units with an async wait-for-zero.
///
/// One unit is reserved per admitted job plus one for the batching loop.
/// The count never goes below zero: a `done` on an empty barrier is logged
/// and ignored.
#[derive(Debug)]
pub(crate) struct CompletionBarrier {
    count: watch::Sender<usize>,
}

impl CompletionBarrier {
    pub(crate) fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    pub(crate) fn add(&self) {
        self.count.send_modify(|count| *count += 1);
    }

    /// Release one unit. Returns false if the barrier was already at zero.
    pub(crate) fn done(&self) -> bool {
        let released = self.count.send_if_modified(|count| {
            if *count == 0 {
                false
            } else {
                *count -= 1;
                true
            }
        });

        if !released {
            warn!("Completion barrier released more times than reserved");
        }
        released
    }

    pub(crate) fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until every reserved unit has been released.
    pub(crate) async fn wait(&self) {
        let mut rx = self.count.subscribe();
        loop {
            if *rx.borrow_and_update() == 0 {
                return;
            }
            // The sender lives in `self`, so `changed` cannot fail here.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
