//! Statement-level change-notification triggers on dependency tables.
//!
//! One function+trigger pair per table, shared by every live query that
//! watches it. Installation runs inside the setup transaction; triggers are
//! never removed by a live query's teardown.

use crate::backend::Transaction;
use crate::error::BackendError;
use crate::naming;
use crate::sql;
use crate::types::{TableRef, Value};

/// Outcome of provisioning triggers for one live query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Tables whose trigger was created by this call.
    pub installed: Vec<TableRef>,
    /// Tables that already carried the trigger.
    pub existing: Vec<TableRef>,
}

/// Function and trigger DDL for `table`.
#[must_use]
pub fn trigger_ddl(table: &TableRef) -> String {
    let function = sql::ident(&naming::trigger_function_name(table));
    let trigger = sql::ident(&naming::trigger_name(table));
    let channel = sql::literal(&naming::channel_name(table));
    let target = sql::qualified_name(table);
    format!(
        r"CREATE OR REPLACE FUNCTION {function}() RETURNS trigger LANGUAGE plpgsql AS $livequery$
BEGIN
    PERFORM pg_notify({channel}, '');
    RETURN NULL;
END;
$livequery$;
CREATE OR REPLACE TRIGGER {trigger}
    AFTER INSERT OR UPDATE OR DELETE ON {target}
    FOR EACH STATEMENT EXECUTE FUNCTION {function}();"
    )
}

/// Transaction-scoped advisory lock serializing installers of the same trigger.
fn lock_sql(table: &TableRef) -> String {
    format!(
        "SELECT pg_advisory_xact_lock(hashtext({})::bigint)",
        sql::literal(&naming::trigger_name(table))
    )
}

fn exists_sql(table: &TableRef) -> String {
    format!(
        "SELECT 1 AS present FROM pg_trigger t WHERE t.tgname = {} AND t.tgrelid = {}::regclass AND NOT t.tgisinternal",
        sql::literal(&naming::trigger_name(table)),
        sql::literal(&sql::qualified_name(table))
    )
}

/// Body of the trigger function `table` would use, if one already exists.
fn function_sql(table: &TableRef) -> String {
    let signature = format!("{}()", sql::ident(&naming::trigger_function_name(table)));
    format!(
        "SELECT p.prosrc AS body FROM pg_proc p WHERE p.oid = to_regprocedure({})",
        sql::literal(&signature)
    )
}

/// Whether a trigger function body notifies `table`'s channel.
fn notifies_channel(body: &str, table: &TableRef) -> bool {
    body.contains(&format!(
        "pg_notify({},",
        sql::literal(&naming::channel_name(table))
    ))
}

/// Refuse to replace a same-named function that serves another table.
///
/// Function names join schema and table with `_`, so `a_b.c` and `a.b_c`
/// share one.
async fn check_function_owner<T: Transaction>(
    tx: &mut T,
    table: &TableRef,
) -> Result<(), BackendError> {
    let existing = tx.query(&function_sql(table)).await?;
    match existing.get(0, "body") {
        Some(Value::Text(body)) if !notifies_channel(body, table) => {
            Err(BackendError::backend(format!(
                "trigger function {} already exists for a different table; refusing to repoint it at {table}",
                naming::trigger_function_name(table)
            )))
        }
        _ => Ok(()),
    }
}

/// Install the notification trigger on every table that lacks one.
///
/// # Errors
///
/// Returns [`BackendError`] if a derived name is too long, the trigger
/// function name is already taken by another table's function, or any
/// statement fails (for example, missing privileges on a dependency table). The
/// caller rolls the whole setup transaction back.
pub async fn provision<T: Transaction>(
    tx: &mut T,
    tables: &[TableRef],
) -> Result<ProvisionReport, BackendError> {
    let mut report = ProvisionReport::default();
    for table in tables {
        naming::check_identifier_length(&naming::trigger_function_name(table))?;
        naming::check_identifier_length(&naming::trigger_name(table))?;
        naming::check_identifier_length(&naming::channel_name(table))?;

        tx.query(&lock_sql(table)).await?;
        if tx.query(&exists_sql(table)).await?.is_empty() {
            check_function_owner(tx, table).await?;
            tx.exec(&trigger_ddl(table)).await?;
            tracing::debug!(table = %table, "notification trigger installed");
            report.installed.push(table.clone());
        } else {
            tracing::trace!(table = %table, "notification trigger already present");
            report.existing.push(table.clone());
        }
    }
    Ok(report)
}
