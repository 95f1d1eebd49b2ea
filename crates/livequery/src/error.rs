//! Error types for the live query engine and its database backends.

use std::fmt;

use crate::types::{LiveQueryId, LiveQueryState};

/// Errors produced by a [`Database`](crate::backend::Database) implementation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Underlying `PostgreSQL` failure.
    #[error("{}", format_pg_error(.0))]
    Postgres(#[from] tokio_postgres::Error),

    /// The connection driving this backend has gone away.
    #[error("database connection closed")]
    ConnectionClosed,

    /// Input rejected before it reached the server.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Opaque failure from a non-postgres backend.
    #[error("{0}")]
    Backend(String),
}

impl BackendError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn backend(msg: impl fmt::Display) -> Self {
        Self::Backend(msg.to_string())
    }

    /// SQLSTATE code when the server reported one.
    #[must_use]
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.as_db_error().map(|db| db.code().code()),
            _ => None,
        }
    }
}

/// Render a postgres error with the server's SQLSTATE, detail and hint when available.
fn format_pg_error(error: &tokio_postgres::Error) -> String {
    if let Some(db_error) = error.as_db_error() {
        let detail = db_error.detail().unwrap_or("n/a");
        let hint = db_error.hint().unwrap_or("n/a");
        format!(
            "postgres error: {} (sqlstate={} severity={} detail={} hint={})",
            db_error.message(),
            db_error.code().code(),
            db_error.severity(),
            detail,
            hint
        )
    } else {
        format!("postgres error: {error}")
    }
}

/// Step of live query setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    /// Rendering bind parameters into the query text.
    BindParameters,
    /// Opening the setup transaction.
    Begin,
    MaterializeView,
    ResolveDependencies,
    InstallTriggers,
    Commit,
    /// First fetch from the view after listeners are registered.
    InitialFetch,
}

impl SetupStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BindParameters => "bind parameters",
            Self::Begin => "begin transaction",
            Self::MaterializeView => "materialize view",
            Self::ResolveDependencies => "resolve dependencies",
            Self::InstallTriggers => "install triggers",
            Self::Commit => "commit",
            Self::InitialFetch => "initial fetch",
        }
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed step of [`LiveQuery::unsubscribe`](crate::LiveQuery::unsubscribe).
#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("unlisten on channel {channel}: {source}")]
    Unlisten {
        channel: String,
        #[source]
        source: BackendError,
    },

    #[error("drop view {view}: {source}")]
    DropView {
        view: String,
        #[source]
        source: BackendError,
    },
}

/// Errors surfaced by the live query engine.
#[derive(Debug, thiserror::Error)]
pub enum LiveQueryError {
    /// Setup failed and was rolled back; the live query was never created.
    #[error("live query setup failed during {stage}: {source}")]
    SetupFailure {
        stage: SetupStage,
        #[source]
        source: BackendError,
    },

    /// A channel listener could not be registered after a committed setup.
    /// Listeners registered so far were removed and the view dropped.
    #[error("listener registration failed on channel {channel}: {source}")]
    ListenerRegistrationFailure {
        channel: String,
        #[source]
        source: BackendError,
    },

    /// Re-executing the view query failed. The subscription stays active.
    #[error("refresh of live query {id} failed: {source}")]
    RefreshFailure {
        id: LiveQueryId,
        #[source]
        source: BackendError,
    },

    /// One or more teardown steps failed. The live query is unsubscribed regardless.
    #[error("teardown of live query {id} failed: {}", join_errors(.errors))]
    TeardownFailure {
        id: LiveQueryId,
        errors: Vec<TeardownError>,
    },

    #[error("live query {id} is {state}, expected active")]
    InvalidState {
        id: LiveQueryId,
        state: LiveQueryState,
    },
}

impl LiveQueryError {
    pub(crate) fn setup(stage: SetupStage) -> impl FnOnce(BackendError) -> Self {
        move |source| Self::SetupFailure { stage, source }
    }
}

fn join_errors(errors: &[TeardownError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, LiveQueryError>;
