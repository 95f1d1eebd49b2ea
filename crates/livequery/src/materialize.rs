//! Temporary views backing live queries.

use crate::backend::{Database, Transaction};
use crate::error::BackendError;
use crate::sql;
use crate::types::QueryResults;

/// `CREATE OR REPLACE TEMP VIEW` for an already bound, single-statement query.
#[must_use]
pub fn create_view_sql(view_name: &str, query: &str) -> String {
    format!(
        "CREATE OR REPLACE TEMP VIEW {} AS {query}",
        sql::ident(view_name)
    )
}

#[must_use]
pub fn drop_view_sql(view_name: &str) -> String {
    format!("DROP VIEW IF EXISTS {}", sql::ident(view_name))
}

#[must_use]
pub fn select_sql(view_name: &str) -> String {
    format!("SELECT * FROM {}", sql::ident(view_name))
}

/// Create (or replace) the view inside the setup transaction.
///
/// The view lives in the session's temporary schema, so it is private to
/// this session and disappears with it.
///
/// # Errors
///
/// Returns [`BackendError`] if the query holds more than one statement or
/// the server rejects it.
pub async fn create_view<T: Transaction>(
    tx: &mut T,
    view_name: &str,
    bound_query: &str,
) -> Result<(), BackendError> {
    let body = sql::single_statement(bound_query)?;
    tx.exec(&create_view_sql(view_name, body)).await?;
    tracing::debug!(view = view_name, "view materialized");
    Ok(())
}

/// Drop the view if it is still present.
///
/// # Errors
///
/// Returns [`BackendError`] on database failure.
pub async fn drop_view<D: Database>(db: &D, view_name: &str) -> Result<(), BackendError> {
    db.exec(&drop_view_sql(view_name)).await?;
    tracing::debug!(view = view_name, "view dropped");
    Ok(())
}

/// Read the view's current contents against the latest committed state.
///
/// # Errors
///
/// Returns [`BackendError`] on database failure.
pub async fn fetch<D: Database>(db: &D, view_name: &str) -> Result<QueryResults, BackendError> {
    db.query(&select_sql(view_name)).await
}
