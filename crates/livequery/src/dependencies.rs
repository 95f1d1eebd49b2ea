//! Catalog introspection: which base tables does a live query's view read?

use std::collections::BTreeSet;

use crate::backend::Transaction;
use crate::error::BackendError;
use crate::sql;
use crate::types::{QueryResults, TableRef};

/// Catalog query listing the base tables behind `view_name`.
///
/// A view's rewrite rule has a normal (`n`) dependency on every relation it
/// reads. Ordinary views found that way are expanded recursively, since
/// only base and partitioned tables can carry the notification trigger.
/// The lookup is pinned to this session's temporary schema.
#[must_use]
pub fn dependency_sql(view_name: &str) -> String {
    let view = sql::literal(view_name);
    format!(
        r"WITH RECURSIVE deps(relid) AS (
    SELECT d.refobjid
    FROM pg_rewrite r
    JOIN pg_depend d ON d.classid = 'pg_rewrite'::regclass AND d.objid = r.oid
    WHERE r.ev_class = (
            SELECT c.oid FROM pg_class c
            WHERE c.relname = {view}
              AND c.relkind = 'v'
              AND c.relnamespace = pg_my_temp_schema()
        )
      AND d.deptype = 'n'
      AND d.refclassid = 'pg_class'::regclass
  UNION
    SELECT d.refobjid
    FROM deps
    JOIN pg_class v ON v.oid = deps.relid AND v.relkind = 'v'
    JOIN pg_rewrite r ON r.ev_class = v.oid
    JOIN pg_depend d ON d.classid = 'pg_rewrite'::regclass AND d.objid = r.oid
    WHERE d.deptype = 'n'
      AND d.refclassid = 'pg_class'::regclass
      AND d.refobjid <> v.oid
)
SELECT DISTINCT n.nspname::text AS schema_name, c.relname::text AS table_name
FROM deps
JOIN pg_class c ON c.oid = deps.relid
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('r', 'p')
ORDER BY schema_name, table_name"
    )
}

/// Resolve the distinct base tables `view_name` depends on.
///
/// An empty result is valid: a constant-only query has nothing to watch.
///
/// # Errors
///
/// Returns [`BackendError`] if the catalog query fails or returns
/// unexpected rows.
pub async fn resolve<T: Transaction>(
    tx: &mut T,
    view_name: &str,
) -> Result<Vec<TableRef>, BackendError> {
    let results = tx.query(&dependency_sql(view_name)).await?;
    let tables = tables_from_rows(&results, view_name)?;
    tracing::debug!(
        view = view_name,
        dependencies = tables.len(),
        "dependencies resolved"
    );
    Ok(tables)
}

/// Extract, deduplicate and sort `(schema, table)` rows, dropping the view itself.
fn tables_from_rows(results: &QueryResults, view_name: &str) -> Result<Vec<TableRef>, BackendError> {
    let mut tables = BTreeSet::new();
    for row in 0..results.len() {
        let schema = results
            .get(row, "schema_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BackendError::backend("dependency row is missing schema_name"))?;
        let table = results
            .get(row, "table_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BackendError::backend("dependency row is missing table_name"))?;
        if table == view_name {
            continue;
        }
        tables.insert(TableRef::new(schema, table));
    }
    Ok(tables.into_iter().collect())
}
