//! Where a live query's snapshots and asynchronous errors go.

use std::sync::Arc;

use crate::error::LiveQueryError;
use crate::types::QueryResults;

/// Receiver of a live query's result snapshots.
///
/// Called from the live query's refresh task, never concurrently with
/// itself for the same live query, and always in delivery order. Must not
/// block.
pub trait ResultsSink: Send + Sync + 'static {
    fn on_results(&self, results: Arc<QueryResults>);

    /// A notification-driven refresh failed. The subscription stays active.
    fn on_error(&self, error: &LiveQueryError) {
        tracing::warn!(error = %error, "live query refresh failed");
    }
}

impl<F> ResultsSink for F
where
    F: Fn(Arc<QueryResults>) + Send + Sync + 'static,
{
    fn on_results(&self, results: Arc<QueryResults>) {
        self(results);
    }
}

/// Sink built from a results closure and an error closure.
pub struct CallbackSink<R, E> {
    on_results: R,
    on_error: E,
}

/// Pair a results callback with a dedicated error callback.
pub fn with_error_handler<R, E>(on_results: R, on_error: E) -> CallbackSink<R, E>
where
    R: Fn(Arc<QueryResults>) + Send + Sync + 'static,
    E: Fn(&LiveQueryError) + Send + Sync + 'static,
{
    CallbackSink {
        on_results,
        on_error,
    }
}

impl<R, E> ResultsSink for CallbackSink<R, E>
where
    R: Fn(Arc<QueryResults>) + Send + Sync + 'static,
    E: Fn(&LiveQueryError) + Send + Sync + 'static,
{
    fn on_results(&self, results: Arc<QueryResults>) {
        (self.on_results)(results);
    }

    fn on_error(&self, error: &LiveQueryError) {
        (self.on_error)(error);
    }
}
