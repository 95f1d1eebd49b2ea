//! Deterministic names for the objects a live query creates or listens on.
//!
//! The trigger provisioner and the listener registration both derive their
//! names from here, so the channel a trigger publishes to is always the
//! channel the subscription listens on.

use crate::error::BackendError;
use crate::types::{LiveQueryId, TableRef};

/// PostgreSQL truncates identifiers (and rejects channel names) beyond this length.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Name of the temporary view backing a live query.
#[must_use]
pub fn view_name(id: LiveQueryId) -> String {
    format!("live_query_{id}_view")
}

/// Name of the notification function installed for `table`.
#[must_use]
pub fn trigger_function_name(table: &TableRef) -> String {
    format!("_notify_{}_{}", table.schema, table.table)
}

/// Name of the statement-level trigger installed on `table`.
#[must_use]
pub fn trigger_name(table: &TableRef) -> String {
    format!("_notify_trigger_{}_{}", table.schema, table.table)
}

/// Notification channel published to whenever `table` changes.
#[must_use]
pub fn channel_name(table: &TableRef) -> String {
    format!("table_change__{}__{}", table.schema, table.table)
}

/// Reject derived names that PostgreSQL would silently truncate.
///
/// Two long table names sharing a 63-byte prefix would otherwise collide on
/// one trigger, and `pg_notify` refuses over-long channels outright.
pub fn check_identifier_length(name: &str) -> Result<(), BackendError> {
    if name.len() > MAX_IDENTIFIER_BYTES {
        return Err(BackendError::invalid_input(format!(
            "identifier '{name}' exceeds PostgreSQL maximum length of {MAX_IDENTIFIER_BYTES} bytes (got {})",
            name.len()
        )));
    }
    Ok(())
}
