//! Result-set decoding for the postgres backend.
//!
//! Field metadata comes from preparing the statement; values come back in
//! text format through the simple query protocol and are decoded by type.

use tokio_postgres::types::Type;
use tokio_postgres::{Client, SimpleQueryMessage};

use crate::error::BackendError;
use crate::types::{Field, QueryResults, Value};

/// Run a single statement and collect its rows with field metadata.
pub(crate) async fn run_query(client: &Client, sql: &str) -> Result<QueryResults, BackendError> {
    let statement = client.prepare(sql).await?;
    let types: Vec<Type> = statement
        .columns()
        .iter()
        .map(|c| c.type_().clone())
        .collect();
    let fields = statement
        .columns()
        .iter()
        .map(|c| Field {
            name: c.name().to_string(),
            type_oid: c.type_().oid(),
        })
        .collect();

    let mut rows = Vec::new();
    let mut affected_rows = None;
    for message in client.simple_query(sql).await? {
        match message {
            SimpleQueryMessage::Row(row) => {
                let mut values = Vec::with_capacity(types.len());
                for (idx, ty) in types.iter().enumerate() {
                    values.push(decode_text(ty, row.try_get(idx)?));
                }
                rows.push(values);
            }
            SimpleQueryMessage::CommandComplete(n) => affected_rows = Some(n),
            _ => {}
        }
    }

    Ok(QueryResults {
        fields,
        rows,
        affected_rows,
    })
}

/// Decode a text-format cell. Unrecognised types stay as text.
pub(crate) fn decode_text(ty: &Type, raw: Option<&str>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    match ty.name() {
        "bool" => Value::Bool(raw == "t"),
        "int2" | "int4" | "int8" | "oid" => raw
            .parse::<i64>()
            .map_or_else(|_| Value::Text(raw.to_string()), Value::Int),
        "float4" | "float8" => raw
            .parse::<f64>()
            .map_or_else(|_| Value::Text(raw.to_string()), Value::Float),
        "json" | "jsonb" => serde_json::from_str(raw)
            .map_or_else(|_| Value::Text(raw.to_string()), Value::Json),
        _ => Value::Text(raw.to_string()),
    }
}
