//! Database capability consumed by the live query engine.
//!
//! [`Database`] is the seam between the engine and a concrete connection:
//! statement execution, transactions and LISTEN/NOTIFY. The engine never
//! talks to a driver directly. [`PgDatabase`](crate::postgres::PgDatabase)
//! is the production implementation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::BackendError;
use crate::types::QueryResults;

/// Invoked once per notification received on a listened channel.
///
/// Runs on the backend's dispatch loop and must not block.
pub type NotifyCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle for one registered channel listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Statement execution and notifications against one database session.
///
/// Statements issued outside a transaction observe the latest committed state.
pub trait Database: Send + Sync + 'static {
    type Transaction: Transaction;

    /// Run a single statement and return its rows.
    fn query(&self, sql: &str) -> impl Future<Output = Result<QueryResults, BackendError>> + Send;

    /// Run one or more `;`-separated statements, discarding any rows.
    fn exec(&self, sql: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Open a transaction. Statements issued through it are atomic.
    fn begin(&self) -> impl Future<Output = Result<Self::Transaction, BackendError>> + Send;

    /// Register `on_event` for notifications on `channel`.
    fn listen(
        &self,
        channel: &str,
        on_event: NotifyCallback,
    ) -> impl Future<Output = Result<ListenerId, BackendError>> + Send;

    /// Remove a listener previously returned by [`Database::listen`].
    fn unlisten(&self, listener: ListenerId)
        -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// A transaction-scoped handle.
///
/// Dropping a transaction without calling [`commit`](Transaction::commit)
/// rolls it back.
pub trait Transaction: Send {
    fn query(&mut self, sql: &str)
        -> impl Future<Output = Result<QueryResults, BackendError>> + Send;

    fn exec(&mut self, sql: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), BackendError>> + Send;
}
