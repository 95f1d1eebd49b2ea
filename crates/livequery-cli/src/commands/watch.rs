use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use livequery::{with_error_handler, LiveQueryError, LiveQueryManager, PgDatabase, QueryResults};
use tokio::sync::mpsc;

use crate::config;

/// Execute the `watch` command: stream snapshots until Ctrl-C or the update limit.
pub async fn execute(watch_path: &Path, max_updates: Option<u64>) -> Result<()> {
    let config = config::parse_watch_file(watch_path)
        .with_context(|| format!("Failed to load watch file: {}", watch_path.display()))?;
    let limit = max_updates.or(config.max_updates);

    let db = PgDatabase::connect(&config.connection)
        .await
        .with_context(|| format!("Failed to connect to {}", config.connection.host))?;
    let manager = LiveQueryManager::new(Arc::new(db));

    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<QueryResults>>();
    let sink = with_error_handler(
        move |results: Arc<QueryResults>| {
            forward(&tx, results);
        },
        |err: &LiveQueryError| eprintln!("refresh failed: {err}"),
    );

    let live = manager
        .create(&config.query, config.params, sink)
        .await
        .context("Failed to create live query")?;

    tracing::info!(
        id = %live.id(),
        view = live.view_name(),
        dependencies = live.dependencies().len(),
        "Watching live query"
    );

    let outcome = stream(&mut rx, limit).await;
    live.unsubscribe().await.context("Failed to unsubscribe")?;
    outcome
}

async fn stream(rx: &mut mpsc::UnboundedReceiver<Arc<QueryResults>>, limit: Option<u64>) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printed: u64 = 0;
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::info!(snapshots = printed, "Interrupted");
                return Ok(());
            }
            next = rx.recv() => {
                let Some(results) = next else {
                    return Ok(());
                };
                println!("{}", snapshot_line(printed, &results)?);
                printed += 1;
                if limit.is_some_and(|limit| printed >= limit) {
                    return Ok(());
                }
            }
        }
    }
}

/// Hand a snapshot to the printer; false once the printer has stopped.
fn forward(tx: &mpsc::UnboundedSender<Arc<QueryResults>>, results: Arc<QueryResults>) -> bool {
    if tx.send(results).is_err() {
        tracing::trace!("snapshot printer gone; dropping snapshot");
        return false;
    }
    true
}

fn snapshot_line(sequence: u64, results: &QueryResults) -> Result<String> {
    let line = serde_json::json!({
        "sequence": sequence,
        "row_count": results.len(),
        "fields": results.fields.iter().map(|f| &f.name).collect::<Vec<_>>(),
        "rows": results.to_json_rows(),
    });
    serde_json::to_string(&line).context("Failed to serialize snapshot")
}
