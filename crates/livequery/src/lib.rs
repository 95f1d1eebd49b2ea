//! Live queries for PostgreSQL.
//!
//! A live query materializes a SQL query as a session-temporary view,
//! installs statement-level `NOTIFY` triggers on every base table the view
//! reads, and re-runs the view whenever one of those tables changes,
//! pushing each new snapshot to a [`ResultsSink`].
//!
//! The engine talks to the database only through the [`Database`] trait;
//! [`PgDatabase`] is the `tokio-postgres` implementation.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod dependencies;
pub(crate) mod dispatcher;
pub mod error;
pub mod ids;
pub mod materialize;
pub mod naming;
pub mod postgres;
pub mod sink;
pub mod sql;
pub mod subscription;
pub mod triggers;
pub mod types;

// Re-export public API for convenience
pub use backend::{Database, ListenerId, NotifyCallback, Transaction};
pub use error::{BackendError, LiveQueryError, Result, SetupStage, TeardownError};
pub use ids::{IdSource, ProcessIds, SequentialIds};
pub use postgres::{ConnectionConfig, PgDatabase};
pub use sink::{with_error_handler, CallbackSink, ResultsSink};
pub use subscription::{LiveQuery, LiveQueryManager};
pub use triggers::ProvisionReport;
pub use types::{Field, LiveQueryId, LiveQueryState, QueryResults, TableRef, Value};
