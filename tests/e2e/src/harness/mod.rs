mod container;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use livequery::{
    with_error_handler, ConnectionConfig, LiveQueryError, PgDatabase, QueryResults, ResultsSink,
};
use tokio::sync::mpsc;
use tokio_postgres::NoTls;

static NEXT_SCHEMA_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct HarnessContext {
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_db: String,
    pub postgres_user: String,
    pub postgres_pass: String,
}

pub async fn bootstrap() -> Result<HarnessContext> {
    let postgres_port = container::shared_postgres_port()?;

    Ok(HarnessContext {
        postgres_host: "127.0.0.1".to_string(),
        postgres_port,
        postgres_db: "postgres".to_string(),
        postgres_user: "postgres".to_string(),
        postgres_pass: "postgres".to_string(),
    })
}

impl HarnessContext {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            user: self.postgres_user.clone(),
            password: self.postgres_pass.clone(),
            database: self.postgres_db.clone(),
            application_name: "livequery-e2e".to_string(),
        }
    }

    /// A fresh live-query session.
    pub async fn live_database(&self) -> Result<Arc<PgDatabase>> {
        let db = PgDatabase::connect(&self.connection_config())
            .await
            .context("failed to open live query session")?;
        Ok(Arc::new(db))
    }

    /// Create an isolated schema holding `orders(id int primary key, status text)`.
    pub async fn allocate_schema(&self, test_name: &str) -> Result<String> {
        let schema_id = NEXT_SCHEMA_ID.fetch_add(1, Ordering::Relaxed);
        let schema = format!("lq_{}_{}", sanitize_identifier(test_name), schema_id);

        let client = self.connect().await?;
        client
            .batch_execute(&format!(
                "CREATE SCHEMA {schema};
                 CREATE TABLE {schema}.orders (id int PRIMARY KEY, status text NOT NULL);"
            ))
            .await
            .with_context(|| format!("failed to create schema {schema}"))?;
        Ok(schema)
    }

    pub async fn drop_schema(&self, schema: &str) -> Result<()> {
        let client = self.connect().await?;
        client
            .execute(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"), &[])
            .await
            .with_context(|| format!("failed to drop schema {schema}"))?;
        Ok(())
    }

    /// Run statements on a separate session, as another application would.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        let client = self.connect().await?;
        client
            .batch_execute(sql)
            .await
            .with_context(|| format!("statement failed: {sql}"))?;
        Ok(())
    }

    pub async fn trigger_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let client = self.connect().await?;
        let row = client
            .query_one(
                "SELECT count(*) FROM pg_trigger t
                 JOIN pg_class c ON c.oid = t.tgrelid
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE n.nspname = $1 AND c.relname = $2 AND t.tgname = $3",
                &[&schema, &table, &format!("_notify_trigger_{schema}_{table}")],
            )
            .await
            .context("trigger lookup failed")?;
        let count: i64 = row.get(0);
        Ok(count == 1)
    }

    async fn connect(&self) -> Result<tokio_postgres::Client> {
        let conn_str = self.connection_config().connection_string();

        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
            .await
            .context("failed to connect to postgres")?;

        tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(client)
    }
}

/// Sink forwarding snapshots and errors into channels a test can await.
pub struct SnapshotStream {
    results: mpsc::UnboundedReceiver<Arc<QueryResults>>,
    errors: mpsc::UnboundedReceiver<String>,
}

pub fn snapshot_stream() -> (impl ResultsSink, SnapshotStream) {
    let (results_tx, results) = mpsc::unbounded_channel();
    let (errors_tx, errors) = mpsc::unbounded_channel();
    let sink = with_error_handler(
        move |snapshot: Arc<QueryResults>| {
            let _ = results_tx.send(snapshot);
        },
        move |err: &LiveQueryError| {
            let _ = errors_tx.send(err.to_string());
        },
    );
    (sink, SnapshotStream { results, errors })
}

impl SnapshotStream {
    /// Next snapshot, failing after ten seconds.
    pub async fn next(&mut self) -> Result<Arc<QueryResults>> {
        tokio::time::timeout(Duration::from_secs(10), self.results.recv())
            .await
            .context("timed out waiting for a snapshot")?
            .context("live query sink dropped")
    }

    /// Wait for a snapshot matching `accept`, skipping intermediate ones.
    pub async fn until(
        &mut self,
        mut accept: impl FnMut(&QueryResults) -> bool,
    ) -> Result<Arc<QueryResults>> {
        loop {
            let snapshot = self.next().await?;
            if accept(&snapshot) {
                return Ok(snapshot);
            }
        }
    }

    /// True when no snapshot arrives within `window`.
    pub async fn is_quiet_for(&mut self, window: Duration) -> bool {
        !matches!(
            tokio::time::timeout(window, self.results.recv()).await,
            Ok(Some(_))
        )
    }

    pub fn errors(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(err) = self.errors.try_recv() {
            out.push(err);
        }
        out
    }
}

fn sanitize_identifier(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '_' })
        .collect()
}
