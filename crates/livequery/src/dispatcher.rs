//! Refresh dispatch with per-live-query serialization and coalescing.
//!
//! Each live query owns a mailbox with room for exactly one pending request
//! and a single consumer task. The consumer takes a request, runs one
//! refresh to completion, then takes the next. Notifications that arrive
//! mid-refresh land in the one free slot ("a refresh is owed"); any further
//! ones find the slot full and are absorbed by it. A burst of notifications
//! therefore costs at most one follow-up refresh, and refreshes never
//! overlap.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Something the dispatcher can refresh. Handles its own errors.
pub(crate) trait RefreshTarget: Send + Sync + 'static {
    fn refresh(&self) -> impl Future<Output = ()> + Send;
}

/// Producer side, cloned into every channel listener of a live query.
#[derive(Clone)]
pub(crate) struct Mailbox {
    tx: mpsc::Sender<()>,
}

impl Mailbox {
    /// Request a refresh.
    ///
    /// Returns `false` when a refresh was already owed and this request was
    /// folded into it, or when the consumer is gone.
    pub(crate) fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(()) | TrySendError::Closed(())) => false,
        }
    }
}

/// Consumer side, handed to [`spawn`].
pub(crate) struct Inbox {
    rx: mpsc::Receiver<()>,
}

pub(crate) fn mailbox() -> (Mailbox, Inbox) {
    let (tx, rx) = mpsc::channel(1);
    (Mailbox { tx }, Inbox { rx })
}

/// Running consumer task.
pub(crate) struct WorkerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to exit. A refresh already running finishes first.
    pub(crate) fn stop(&self) {
        self.shutdown.notify_one();
    }

    #[cfg(test)]
    pub(crate) async fn join(self) {
        let _ = self.join.await;
    }
}

/// Start the consumer loop for one live query.
pub(crate) fn spawn<T: RefreshTarget>(target: Arc<T>, mut inbox: Inbox) -> WorkerHandle {
    let shutdown = Arc::new(Notify::new());
    let stop = Arc::clone(&shutdown);
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = stop.notified() => break,
                request = inbox.rx.recv() => match request {
                    Some(()) => target.refresh().await,
                    None => break,
                },
            }
        }
        tracing::trace!("refresh worker stopped");
    });
    WorkerHandle { shutdown, join }
}
