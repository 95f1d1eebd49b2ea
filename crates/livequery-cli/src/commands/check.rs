use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use livequery::{LiveQueryManager, PgDatabase, QueryResults, TableRef};

use crate::config;

/// Execute the `check` command: register the live query once, report, tear down.
pub async fn execute(watch_path: &Path) -> Result<()> {
    let config = config::parse_watch_file(watch_path)
        .with_context(|| format!("Failed to load watch file: {}", watch_path.display()))?;
    println!("Watch file:         OK");

    let db = PgDatabase::connect(&config.connection)
        .await
        .with_context(|| format!("Failed to connect to {}", config.connection.host))?;
    println!("Connection:         OK");

    let manager = LiveQueryManager::new(Arc::new(db));
    let live = manager
        .create(&config.query, config.params, |_: Arc<QueryResults>| {})
        .await
        .context("Failed to create live query")?;

    let report = live.provision_report();
    println!("{:19} {}", "View:", live.view_name());
    println!("{:19} {}", "Dependencies:", join(live.dependencies()));
    println!("{:19} {}", "Channels:", live.channels().join(", "));
    println!("{:19} {}", "Triggers installed:", join(&report.installed));
    println!("{:19} {}", "Triggers existing:", join(&report.existing));
    println!("{:19} {}", "Initial rows:", live.initial_results().len());

    live.unsubscribe().await.context("Failed to tear down live query")?;
    println!("\nAll checks passed.");
    Ok(())
}

fn join(tables: &[TableRef]) -> String {
    if tables.is_empty() {
        return "(none)".to_string();
    }
    tables
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
